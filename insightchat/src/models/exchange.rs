//! Wire types for the assistant API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of both the streaming and non-streaming chat requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
}

/// Non-streaming chat response.
///
/// `message` and `recommendations` are kept as raw JSON: depending on the
/// backend route they hold plain text or a full agent trace, and must go
/// through the normalizer before display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub chart_config: Option<Value>,
    #[serde(default)]
    pub recommendations: Option<Value>,
}

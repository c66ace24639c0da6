//! Message model for the conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the assistant.
    Assistant,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which tier of the fallback chain produced an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Typed by the user.
    User,
    /// Assembled from the live event stream.
    Stream,
    /// Single non-streaming request.
    NonStream,
    /// Canned offline answer.
    Fallback,
}

/// A message in the conversation log.
///
/// Assistant messages start empty and are filled by the stream assembler or a
/// fallback tier. Once `frozen` is set nothing mutates the message again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledMessage {
    pub id: String,
    pub role: MessageRole,
    /// Display text. Grows monotonically while chunks arrive.
    pub content: String,
    pub data: Option<Value>,
    pub chart_config: Option<Value>,
    pub sql_query: Option<String>,
    pub recommendations: Vec<String>,
    pub query_type: Option<String>,
    pub source: ResponseSource,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    frozen: bool,
}

impl AssembledMessage {
    /// Create a finished user message.
    pub fn user(content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::User, ResponseSource::User);
        msg.content = content.into();
        msg.frozen = true;
        msg
    }

    /// Create an empty assistant message for the given tier.
    pub fn assistant(source: ResponseSource) -> Self {
        Self::new(MessageRole::Assistant, source)
    }

    fn new(role: MessageRole, source: ResponseSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: String::new(),
            data: None,
            chart_config: None,
            sql_query: None,
            recommendations: Vec::new(),
            query_type: None,
            source,
            timestamp: Utc::now(),
            frozen: false,
        }
    }

    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the message final.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }
}

//! Streaming event frames.
//!
//! The streaming endpoint answers with server-sent-event style lines. Each
//! line of interest starts with `data:` followed by a JSON object whose
//! `type` field selects the event:
//!
//! ```text
//! data: {"type":"start","conversation_id":"..."}
//! data: {"type":"chunk","content":"Sales "}
//! data: {"type":"complete","result":{"message":"Sales rose 4%."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};
use crate::models::ChatResponse;

/// Prefix marking a line that carries an event.
pub const FRAME_PREFIX: &str = "data:";

/// Sentinel some backends send after the final event.
const DONE_SENTINEL: &str = "[DONE]";

/// One event of a streamed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The backend accepted the request; may confirm or assign the conversation id.
    Start {
        #[serde(default, alias = "session_id")]
        conversation_id: Option<String>,
    },
    /// A piece of the answer text.
    Chunk {
        #[serde(default, alias = "text", alias = "delta")]
        content: Value,
    },
    /// Structured query results.
    Data {
        #[serde(default)]
        data: Value,
    },
    /// Chart specification for the data.
    Chart {
        #[serde(default, alias = "config", alias = "chartConfig")]
        chart_config: Value,
    },
    /// Final consolidated result; no further frames are read.
    Complete {
        #[serde(default)]
        result: Option<ChatResponse>,
    },
    /// The backend gave up on this exchange.
    Error {
        #[serde(default, alias = "message")]
        error: Option<String>,
    },
    /// Any `type` this client does not know.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Convenience constructor for text chunks.
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk {
            content: Value::String(text.into()),
        }
    }

    /// Get the event type as a string for logging.
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Chunk { .. } => "chunk",
            Self::Data { .. } => "data",
            Self::Chart { .. } => "chart",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether no frame may follow this one.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Encode as a `data:` line followed by the blank separator line.
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"unknown"}"#.into());
        format!("{FRAME_PREFIX} {json}\n\n")
    }
}

/// Parse one complete line of the stream.
///
/// Returns `Ok(None)` for lines that carry no event (blank separators, SSE
/// comments and other fields, the `[DONE]` sentinel) and
/// [`ChatError::Protocol`] for a `data:` line whose payload is not a valid
/// event.
pub fn parse_frame(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return Ok(None);
    }

    serde_json::from_str(payload).map(Some).map_err(|e| {
        let preview: String = payload.chars().take(80).collect();
        ChatError::Protocol(format!("malformed frame ({e}): {preview}"))
    })
}

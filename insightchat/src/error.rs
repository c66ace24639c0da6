//! Error types for the chat pipeline.

/// Errors raised while servicing a chat exchange.
///
/// None of these are fatal to the conversation: transport and protocol
/// failures drive the fallback chain, storage failures degrade the session
/// to an in-memory one.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned HTTP {status}")]
    Http { status: u16 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("session storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether this failure should move the exchange to the next fallback tier.
    pub const fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http { .. } | Self::Protocol(_) | Self::Stream(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
            },
            None if err.is_decode() => Self::Protocol(err.to_string()),
            None => Self::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

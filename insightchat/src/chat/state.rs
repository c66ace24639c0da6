//! Orchestrator states.

use serde::{Deserialize, Serialize};

/// Where the orchestrator is in servicing one query.
///
/// `Idle -> Sending -> {StreamingOpen -> StreamingChunking -> StreamingComplete
/// | NonStreamingRequest | FallbackResponse} -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Idle,
    /// Checking health before choosing a tier.
    Sending,
    /// Streaming request issued, no frame yet.
    StreamingOpen,
    /// Frames are arriving.
    StreamingChunking,
    StreamingComplete,
    NonStreamingRequest,
    FallbackResponse,
}

impl ChatState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::StreamingOpen => "streaming_open",
            Self::StreamingChunking => "streaming_chunking",
            Self::StreamingComplete => "streaming_complete",
            Self::NonStreamingRequest => "non_streaming_request",
            Self::FallbackResponse => "fallback_response",
        }
    }

    /// Input is only accepted between exchanges.
    pub const fn accepts_input(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub const fn is_streaming(self) -> bool {
        matches!(
            self,
            Self::StreamingOpen | Self::StreamingChunking | Self::StreamingComplete
        )
    }
}

impl std::fmt::Display for ChatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

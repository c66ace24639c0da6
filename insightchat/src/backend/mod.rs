//! Transport to the assistant backend.

mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{ChatRequest, ChatResponse};

pub use http::HttpBackend;

/// Raw body of a streaming exchange, as it arrives off the wire.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Operations the client needs from the assistant API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Lightweight reachability check. Any error means offline.
    async fn check_health(&self) -> Result<()>;

    /// Single request/response exchange.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Open the streaming exchange and hand back its body.
    ///
    /// Dropping the returned stream releases the connection.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
}

//! HTTP implementation of the assistant API.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tracing::debug;

use super::{ByteStream, ChatBackend};
use crate::config::{BackendConfig, HealthConfig};
use crate::error::{ChatError, Result};
use crate::models::{ChatRequest, ChatResponse};

const HEALTH_PATH: &str = "/health";
const CHAT_PATH: &str = "/api/chat";
const STREAM_PATH: &str = "/api/chat/stream";

/// Talks to the assistant over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    config: BackendConfig,
    health: HealthConfig,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, health: &HealthConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config: config.clone(),
            health: health.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turn a non-success status into [`ChatError::Http`].
fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ChatError::Http {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn check_health(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.url(HEALTH_PATH))
            .timeout(self.health.probe_timeout())
            .send()
            .await?;
        check_status(resp)?;
        Ok(())
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!("POST {CHAT_PATH} conversation={}", request.conversation_id);
        let resp = self
            .client
            .post(self.url(CHAT_PATH))
            .timeout(self.config.request_timeout())
            .json(request)
            .send()
            .await?;
        let response: ChatResponse = check_status(resp)?.json().await?;
        Ok(response)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        debug!("POST {STREAM_PATH} conversation={}", request.conversation_id);
        let resp = self
            .client
            .post(self.url(STREAM_PATH))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let resp = check_status(resp)?;

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = BackendConfig {
            base_url: "http://localhost:9000/".into(),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config, &HealthConfig::default()).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:9000");
        assert_eq!(backend.url(STREAM_PATH), "http://localhost:9000/api/chat/stream");
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 1,
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config, &HealthConfig::default()).unwrap();
        let err = backend.check_health().await.unwrap_err();
        assert!(matches!(err, ChatError::Network(_)), "got {err:?}");
    }
}

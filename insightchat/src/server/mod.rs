//! Demo assistant backend.
//!
//! Serves the same three endpoints the client talks to, answering every
//! question from a [`FallbackTable`]. Streamed answers go out one word per
//! `chunk` frame so the live path can be exercised without a real agent.
//!
//! Endpoints:
//! - GET /health
//! - POST /api/chat
//! - POST /api/chat/stream

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::fallback::FallbackTable;
use crate::models::{ChatRequest, ChatResponse};
use crate::session::generate_conversation_id;
use crate::stream::StreamEvent;

/// Knobs for exercising the client's failure handling.
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// Pause between streamed words.
    pub chunk_delay: Duration,
    /// Answer the streaming endpoint with 503.
    pub fail_stream: bool,
    /// Answer the non-streaming endpoint with 500.
    pub fail_chat: bool,
    /// Interleave an unparseable frame after the first word.
    pub malformed_frames: bool,
}

/// Shared server state.
pub struct DemoState {
    table: FallbackTable,
    options: DemoOptions,
}

impl DemoState {
    pub const fn new(table: FallbackTable, options: DemoOptions) -> Self {
        Self { table, options }
    }

    fn conversation_id(request: &ChatRequest) -> String {
        if request.conversation_id.is_empty() {
            generate_conversation_id()
        } else {
            request.conversation_id.clone()
        }
    }

    fn reply(&self, request: &ChatRequest, conversation_id: String) -> ChatResponse {
        ChatResponse {
            message: Value::String(self.table.respond(&request.message).to_string()),
            conversation_id: Some(conversation_id),
            query_type: Some("demo".to_string()),
            recommendations: Some(json!(["Ask about a specific region or dealership"])),
            ..ChatResponse::default()
        }
    }
}

/// Build the demo router.
pub fn router(state: Arc<DemoState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: Arc<DemoState>) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .context("Server error")
}

/// Bind `127.0.0.1:port` and serve.
pub async fn start_server(port: u16, state: Arc<DemoState>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Demo backend listening on http://{addr}");
    println!("Demo backend listening on http://{addr}");
    serve(listener, state).await
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn chat(
    State(state): State<Arc<DemoState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    if state.options.fail_chat {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if request.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let conversation_id = DemoState::conversation_id(&request);
    debug!("chat conversation={conversation_id}");
    Ok(Json(state.reply(&request, conversation_id)))
}

async fn chat_stream(
    State(state): State<Arc<DemoState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if state.options.fail_stream {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if request.message.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let conversation_id = DemoState::conversation_id(&request);
    debug!("chat_stream conversation={conversation_id}");
    let reply = state.reply(&request, conversation_id.clone());
    let options = state.options.clone();

    let (tx, rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let text = reply.message.as_str().unwrap_or_default().to_string();
        let mut frames = vec![StreamEvent::Start {
            conversation_id: Some(conversation_id),
        }
        .to_frame()];
        for (i, word) in text.split_inclusive(' ').enumerate() {
            frames.push(StreamEvent::chunk(word).to_frame());
            if i == 0 && options.malformed_frames {
                frames.push("data: {\"type\":\"chunk\",\"content\":\n\n".to_string());
            }
        }
        frames.push(
            StreamEvent::Complete {
                result: Some(reply),
            }
            .to_frame(),
        );

        for frame in frames {
            if tx.send(frame).await.is_err() {
                debug!("Stream consumer went away");
                return;
            }
            if !options.chunk_delay.is_zero() {
                tokio::time::sleep(options.chunk_delay).await;
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

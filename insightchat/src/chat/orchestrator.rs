//! The top-level state machine servicing one user query at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::ChatState;
use crate::backend::ChatBackend;
use crate::error::{ChatError, Result};
use crate::fallback::FallbackTable;
use crate::health::HealthMonitor;
use crate::models::{AssembledMessage, ChatRequest, HealthStatus, ResponseSource};
use crate::normalize::{normalize, normalize_list};
use crate::session::SessionStore;
use crate::stream::{ExchangeUpdate, MessageAssembler, StreamClient, StreamOutcome};

/// Runs each query through stream, then non-stream, then the canned table,
/// and keeps the conversation log.
///
/// `submit` takes `&mut self`, so a second query cannot start while one is
/// in flight. Every path that does not fail validation appends exactly one
/// user message and one assistant message to the log; a `submit` future
/// dropped before it finishes appends nothing and leaves the state `Idle`.
pub struct ChatOrchestrator {
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<SessionStore>,
    health: Arc<HealthMonitor>,
    fallback: FallbackTable,
    streaming: bool,
    idle_timeout: Duration,
    updates: Option<mpsc::UnboundedSender<ExchangeUpdate>>,
    state: watch::Sender<ChatState>,
    messages: Vec<AssembledMessage>,
}

impl ChatOrchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sessions: Arc<SessionStore>,
        health: Arc<HealthMonitor>,
        fallback: FallbackTable,
    ) -> Self {
        let (state, _) = watch::channel(ChatState::Idle);
        Self {
            backend,
            sessions,
            health,
            fallback,
            streaming: true,
            idle_timeout: Duration::from_secs(120),
            updates: None,
            state,
            messages: Vec::new(),
        }
    }

    /// Skip the streaming tier when `false`.
    #[must_use]
    pub const fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Receive chunks, data and charts while a stream is being assembled.
    #[must_use]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<ExchangeUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ChatState {
        *self.state.borrow()
    }

    pub fn is_input_enabled(&self) -> bool {
        self.state().accepts_input()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The conversation log, oldest first.
    pub fn messages(&self) -> &[AssembledMessage] {
        &self.messages
    }

    /// Drop the log and the conversation id.
    pub fn clear_conversation(&mut self) -> Result<()> {
        self.messages.clear();
        self.sessions.clear()
    }

    /// Service one query. Only blank input is rejected; every other failure
    /// ends in an assistant message.
    pub async fn submit(&mut self, text: &str) -> Result<&AssembledMessage> {
        self.submit_with_cancel(text, &CancellationToken::new()).await
    }

    /// Like [`submit`](Self::submit), but a cancelled `cancel` stops an
    /// in-flight stream and keeps whatever was assembled so far.
    pub async fn submit_with_cancel(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<&AssembledMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let question = AssembledMessage::user(text);
        let reply = {
            let _idle = IdleOnDrop(&self.state);
            self.set_state(ChatState::Sending);
            if self.health.probe().await == HealthStatus::Online {
                self.exchange_online(text, cancel).await
            } else {
                info!("Backend offline, answering from fallback table");
                self.fallback_reply(text)
            }
        };

        // Question and answer land together, so a dropped exchange leaves no
        // unanswered question behind.
        self.messages.push(question);
        self.messages.push(reply);
        Ok(&self.messages[self.messages.len() - 1])
    }

    async fn exchange_online(&self, text: &str, cancel: &CancellationToken) -> AssembledMessage {
        let request = ChatRequest {
            message: text.to_string(),
            conversation_id: self.sessions.get_id(),
        };

        if self.streaming {
            self.set_state(ChatState::StreamingOpen);
            match self.stream_exchange(&request, cancel).await {
                Ok(message) => return message,
                Err(e) => log_tier_failure("Streaming", &e),
            }
        }

        self.set_state(ChatState::NonStreamingRequest);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Request cancelled, answering from fallback table");
                return self.fallback_reply(text);
            }
            outcome = self.request_exchange(&request) => outcome,
        };
        match outcome {
            Ok(message) => message,
            Err(e) => {
                log_tier_failure("Non-streaming request", &e);
                self.fallback_reply(text)
            }
        }
    }

    async fn stream_exchange(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AssembledMessage> {
        let mut assembler = MessageAssembler::new();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Stream cancelled before the answer started");
                return Ok(assembler.finish());
            }
            opened = tokio::time::timeout(self.idle_timeout, self.backend.open_stream(request)) => opened,
        };
        let body = opened.map_err(|_| {
            ChatError::Network(format!(
                "no stream response within {}s",
                self.idle_timeout.as_secs()
            ))
        })??;

        let outcome = StreamClient::new(&self.sessions)
            .with_updates(self.updates.as_ref())
            .with_state(&self.state)
            .with_idle_timeout(self.idle_timeout)
            .consume(body, &mut assembler, cancel)
            .await?;

        match outcome {
            StreamOutcome::Completed => self.set_state(ChatState::StreamingComplete),
            StreamOutcome::Ended => debug!("Stream ended without completion"),
            StreamOutcome::Cancelled => info!("Stream cancelled, keeping partial answer"),
        }
        self.sessions.refresh();
        Ok(assembler.finish())
    }

    async fn request_exchange(&self, request: &ChatRequest) -> Result<AssembledMessage> {
        let response = self.backend.send(request).await?;

        match response.conversation_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.sessions.adopt(id),
            None => self.sessions.refresh(),
        }

        let mut message = AssembledMessage::assistant(ResponseSource::NonStream);
        message.content = normalize(&response.message);
        message.data = response.data;
        message.chart_config = response.chart_config;
        message.sql_query = response.sql_query.filter(|s| !s.trim().is_empty());
        message.query_type = response.query_type;
        if let Some(recommendations) = &response.recommendations {
            message.recommendations = normalize_list(recommendations);
        }

        if message.content.trim().is_empty()
            && message.data.is_none()
            && message.chart_config.is_none()
        {
            return Err(ChatError::Protocol("reply carried nothing to display".into()));
        }
        message.freeze();
        Ok(message)
    }

    fn fallback_reply(&self, text: &str) -> AssembledMessage {
        self.set_state(ChatState::FallbackResponse);
        let mut message = AssembledMessage::assistant(ResponseSource::Fallback);
        message.content = self.fallback.respond(text).to_string();
        message.freeze();
        message
    }

    fn set_state(&self, next: ChatState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Chat state {previous} -> {next}");
        }
    }
}

/// Puts the orchestrator back to `Idle` however the exchange ends,
/// including when the `submit` future is dropped mid-flight.
struct IdleOnDrop<'a>(&'a watch::Sender<ChatState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let previous = self.0.send_replace(ChatState::Idle);
        if previous != ChatState::Idle {
            debug!("Chat state {previous} -> idle");
        }
    }
}

fn log_tier_failure(tier: &str, e: &ChatError) {
    if e.triggers_fallback() {
        warn!("{tier} failed, moving to next tier: {e}");
    } else {
        error!("{tier} failed unexpectedly, moving to next tier: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as TtlDuration;
    use futures::{stream, StreamExt};
    use serde_json::json;

    use super::*;
    use crate::backend::ByteStream;
    use crate::models::ChatResponse;
    use crate::session::MemoryStore;

    enum StreamScript {
        Frames(Vec<&'static str>),
        /// Send the frames, then never finish.
        Hang(Vec<&'static str>),
        /// Accept the request but never answer it.
        NoHeaders,
        Refuse(u16),
    }

    struct ScriptedBackend {
        online: bool,
        stream: StreamScript,
        reply: Option<ChatResponse>,
        stream_calls: AtomicUsize,
        send_calls: AtomicUsize,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(stream: StreamScript, reply: Option<ChatResponse>) -> Self {
            Self {
                online: true,
                stream,
                reply,
                stream_calls: AtomicUsize::new(0),
                send_calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn offline() -> Self {
            Self {
                online: false,
                ..Self::new(StreamScript::Refuse(503), None)
            }
        }
    }

    fn frames(parts: &[&'static str]) -> ByteStream {
        let owned: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned).boxed()
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn check_health(&self) -> Result<()> {
            if self.online {
                Ok(())
            } else {
                Err(ChatError::Network("connection refused".into()))
            }
        }

        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone().ok_or(ChatError::Http { status: 500 })
        }

        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            match &self.stream {
                StreamScript::Frames(parts) => Ok(frames(parts)),
                StreamScript::Hang(parts) => Ok(frames(parts).chain(stream::pending()).boxed()),
                StreamScript::NoHeaders => futures::future::pending().await,
                StreamScript::Refuse(status) => Err(ChatError::Http { status: *status }),
            }
        }
    }

    fn orchestrator(backend: Arc<ScriptedBackend>) -> ChatOrchestrator {
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryStore::new()),
            TtlDuration::hours(24),
        ));
        let health = Arc::new(HealthMonitor::new(backend.clone()));
        ChatOrchestrator::new(backend, sessions, health, FallbackTable::builtin())
    }

    const ANSWER_FRAMES: &[&str] = &[
        "data: {\"type\":\"start\",\"conversation_id\":\"conv-from-stream\"}\n\n",
        "data: {\"type\":\"chunk\",\"content\":\"Lakeside Motors \"}\n\n",
        "data: {\"type\":\"chunk\",\"content\":\"leads.\"}\n\n",
        "data: {\"type\":\"data\",\"data\":[{\"dealer\":\"Lakeside Motors\",\"gross\":1200000}]}\n\n",
        "data: {\"type\":\"complete\",\"result\":{\"message\":\"Lakeside Motors leads.\",\"sql_query\":\"SELECT dealer FROM gross\"}}\n\n",
    ];

    #[tokio::test]
    async fn offline_answers_midwest_fi_from_table() {
        let backend = Arc::new(ScriptedBackend::new(StreamScript::Frames(ANSWER_FRAMES.to_vec()), None));
        let mut chat = orchestrator(backend.clone());
        chat.health.force_offline(true);

        let reply = chat
            .submit("How is F&I doing in the Midwest?")
            .await
            .unwrap();
        assert_eq!(reply.source, ResponseSource::Fallback);
        assert!(reply.content.starts_with("Midwest F&I performance"));
        assert!(reply.is_frozen());
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 0);
        assert_eq!(chat.health.state().status, HealthStatus::Offline);
    }

    #[tokio::test]
    async fn unreachable_backend_uses_fallback() {
        let backend = Arc::new(ScriptedBackend::offline());
        let mut chat = orchestrator(backend);
        let reply = chat.submit("something unrelated").await.unwrap();
        assert_eq!(reply.source, ResponseSource::Fallback);
        assert_eq!(reply.content, FallbackTable::builtin().default_response);
    }

    #[tokio::test]
    async fn streamed_answer_is_assembled() {
        let backend = Arc::new(ScriptedBackend::new(StreamScript::Frames(ANSWER_FRAMES.to_vec()), None));
        let mut chat = orchestrator(backend.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        chat = chat.with_updates(tx);

        let reply = chat.submit("Who is the top dealer?").await.unwrap().clone();
        assert_eq!(reply.source, ResponseSource::Stream);
        assert_eq!(reply.content, "Lakeside Motors leads.");
        assert_eq!(reply.sql_query.as_deref(), Some("SELECT dealer FROM gross"));
        assert!(reply.data.is_some());
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 0);

        assert_eq!(chat.state(), ChatState::Idle);
        assert!(chat.is_input_enabled());
        assert_eq!(chat.sessions().get_id(), "conv-from-stream");

        let mut chunks = String::new();
        while let Ok(update) = rx.try_recv() {
            if let ExchangeUpdate::Chunk(text) = update {
                chunks.push_str(&text);
            }
        }
        assert_eq!(chunks, "Lakeside Motors leads.");
    }

    #[tokio::test]
    async fn refused_stream_retries_without_streaming() {
        let reply = ChatResponse {
            message: json!({"messages": [{"content": "Inventory is at 64 days."}]}),
            conversation_id: Some("conv-from-reply".into()),
            recommendations: Some(json!(["Review aging sedans"])),
            query_type: Some("sql".into()),
            ..ChatResponse::default()
        };
        let backend = Arc::new(ScriptedBackend::new(StreamScript::Refuse(502), Some(reply)));
        let mut chat = orchestrator(backend.clone());

        let msg = chat.submit("inventory?").await.unwrap().clone();
        assert_eq!(msg.source, ResponseSource::NonStream);
        assert_eq!(msg.content, "Inventory is at 64 days.");
        assert_eq!(msg.recommendations, vec!["Review aging sedans"]);
        assert_eq!(msg.query_type.as_deref(), Some("sql"));
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.sessions().get_id(), "conv-from-reply");

        // Both tiers were offered the same conversation id.
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].conversation_id, requests[1].conversation_id);
    }

    #[tokio::test]
    async fn error_frame_falls_through_to_request() {
        let reply = ChatResponse {
            message: json!("Service RO count is up 5%."),
            ..ChatResponse::default()
        };
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::Frames(vec![
                "data: {\"type\":\"chunk\",\"content\":\"Serv\"}\n\n",
                "data: {\"type\":\"error\",\"error\":\"agent crashed\"}\n\n",
            ]),
            Some(reply),
        ));
        let mut chat = orchestrator(backend);
        let msg = chat.submit("service?").await.unwrap();
        assert_eq!(msg.source, ResponseSource::NonStream);
        assert_eq!(msg.content, "Service RO count is up 5%.");
    }

    #[tokio::test]
    async fn every_tier_failing_ends_in_fallback() {
        let backend = Arc::new(ScriptedBackend::new(StreamScript::Refuse(500), None));
        let mut chat = orchestrator(backend.clone());
        let msg = chat.submit("top dealer this quarter").await.unwrap();
        assert_eq!(msg.source, ResponseSource::Fallback);
        assert!(msg.content.starts_with("Top dealerships"));
        assert_eq!(chat.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn empty_reply_is_not_shown() {
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::Refuse(500),
            Some(ChatResponse {
                message: json!({}),
                ..ChatResponse::default()
            }),
        ));
        let mut chat = orchestrator(backend);
        let msg = chat.submit("sales").await.unwrap();
        assert_eq!(msg.source, ResponseSource::Fallback);
        assert!(msg.content.starts_with("Sales trend"));
    }

    #[tokio::test]
    async fn streaming_disabled_goes_straight_to_request() {
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::Frames(ANSWER_FRAMES.to_vec()),
            Some(ChatResponse {
                message: json!("plain"),
                ..ChatResponse::default()
            }),
        ));
        let mut chat = orchestrator(backend.clone()).with_streaming(false);
        let msg = chat.submit("anything").await.unwrap();
        assert_eq!(msg.source, ResponseSource::NonStream);
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_logging() {
        let backend = Arc::new(ScriptedBackend::offline());
        let mut chat = orchestrator(backend);
        assert!(matches!(chat.submit("   ").await, Err(ChatError::EmptyMessage)));
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn cancelled_stream_keeps_partial_answer() {
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::Hang(vec!["data: {\"type\":\"chunk\",\"content\":\"Partial \"}\n\n"]),
            Some(ChatResponse {
                message: json!("should not be used"),
                ..ChatResponse::default()
            }),
        ));
        let mut chat = orchestrator(backend.clone());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let msg = chat.submit_with_cancel("slow one", &cancel).await.unwrap();
        assert_eq!(msg.source, ResponseSource::Stream);
        assert_eq!(msg.content, "Partial ");
        assert!(msg.is_frozen());
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 0);
        assert!(chat.is_input_enabled());
    }

    #[tokio::test]
    async fn silent_stream_endpoint_times_out_to_request() {
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::NoHeaders,
            Some(ChatResponse {
                message: json!("Used car turn is 41 days."),
                ..ChatResponse::default()
            }),
        ));
        let mut chat = orchestrator(backend.clone()).with_idle_timeout(Duration::from_millis(50));

        let msg = tokio::time::timeout(Duration::from_secs(5), chat.submit("used car turn"))
            .await
            .expect("stream open should time out")
            .unwrap();
        assert_eq!(msg.source, ResponseSource::NonStream);
        assert_eq!(msg.content, "Used car turn is 41 days.");
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.state(), ChatState::Idle);
    }

    #[tokio::test]
    async fn cancel_before_stream_opens_returns_promptly() {
        let backend = Arc::new(ScriptedBackend::new(
            StreamScript::NoHeaders,
            Some(ChatResponse {
                message: json!("should not be used"),
                ..ChatResponse::default()
            }),
        ));
        let mut chat = orchestrator(backend.clone());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let msg = tokio::time::timeout(
            Duration::from_secs(5),
            chat.submit_with_cancel("slow one", &cancel),
        )
        .await
        .expect("cancel should end the exchange")
        .unwrap();
        assert_eq!(msg.source, ResponseSource::Stream);
        assert!(msg.content.is_empty());
        assert!(msg.is_frozen());
        assert_eq!(backend.send_calls.load(Ordering::SeqCst), 0);
        assert!(chat.is_input_enabled());
        assert_eq!(chat.messages().len(), 2);
    }

    #[tokio::test]
    async fn dropped_submit_leaves_chat_idle_and_log_paired() {
        let backend = Arc::new(ScriptedBackend::new(StreamScript::NoHeaders, None));
        let mut chat = orchestrator(backend.clone());
        let mut state_rx = chat.subscribe_state();

        let outcome = tokio::time::timeout(Duration::from_millis(50), chat.submit("sales")).await;
        assert!(outcome.is_err());
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);

        assert_eq!(*state_rx.borrow_and_update(), ChatState::Idle);
        assert!(chat.is_input_enabled());
        assert!(chat.messages().is_empty());

        // The next question goes through normally.
        chat.health.force_offline(true);
        chat.submit("inventory").await.unwrap();
        assert_eq!(chat.messages().len(), 2);
    }

    #[tokio::test]
    async fn log_is_append_only_and_clear_resets() {
        let backend = Arc::new(ScriptedBackend::offline());
        let mut chat = orchestrator(backend);

        chat.submit("inventory").await.unwrap();
        chat.submit("service").await.unwrap();
        let sources: Vec<_> = chat.messages().iter().map(|m| m.source).collect();
        assert_eq!(
            sources,
            vec![
                ResponseSource::User,
                ResponseSource::Fallback,
                ResponseSource::User,
                ResponseSource::Fallback,
            ]
        );
        assert_eq!(chat.messages()[0].content, "inventory");

        let before = chat.sessions().get_id();
        chat.clear_conversation().unwrap();
        assert!(chat.messages().is_empty());
        assert_ne!(chat.sessions().get_id(), before);
    }
}

//! Consumes a streaming exchange and drives the message assembler.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::assembler::{MessageAssembler, Step};
use super::decoder::LineDecoder;
use super::events::{parse_frame, StreamEvent};
use crate::backend::ByteStream;
use crate::chat::ChatState;
use crate::error::{ChatError, Result};
use crate::normalize::strip_artifacts;
use crate::session::SessionStore;

/// Live progress of an exchange, for displays that render as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeUpdate {
    /// Text appended to the answer.
    Chunk(String),
    /// Structured results; sent once per `data` frame.
    Data(Value),
    /// Chart specification replaced.
    Chart(Value),
}

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `complete` frame arrived.
    Completed,
    /// The body ended without `complete` after some output was assembled.
    Ended,
    /// The caller cancelled; whatever was assembled stays as-is.
    Cancelled,
}

/// Reads frames off a [`ByteStream`] and applies them in arrival order.
pub struct StreamClient<'a> {
    sessions: &'a SessionStore,
    updates: Option<&'a mpsc::UnboundedSender<ExchangeUpdate>>,
    state: Option<&'a watch::Sender<ChatState>>,
    idle_timeout: Duration,
}

impl<'a> StreamClient<'a> {
    pub const fn new(sessions: &'a SessionStore) -> Self {
        Self {
            sessions,
            updates: None,
            state: None,
            idle_timeout: Duration::from_secs(120),
        }
    }

    /// Forward chunks, data and charts to `updates` as they arrive.
    #[must_use]
    pub const fn with_updates(
        mut self,
        updates: Option<&'a mpsc::UnboundedSender<ExchangeUpdate>>,
    ) -> Self {
        self.updates = updates;
        self
    }

    /// Report `StreamingChunking` on `state` once frames flow.
    #[must_use]
    pub const fn with_state(mut self, state: &'a watch::Sender<ChatState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Fail the exchange when no bytes arrive for this long.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Consume `body` until a terminal frame, end of body, or cancellation.
    ///
    /// `body` is dropped, and with it the underlying connection, on every
    /// return path. Malformed frames are logged and skipped.
    pub async fn consume(
        &self,
        mut body: ByteStream,
        assembler: &mut MessageAssembler,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let mut decoder = LineDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Stream cancelled by consumer");
                    return Ok(StreamOutcome::Cancelled);
                }
                next = tokio::time::timeout(self.idle_timeout, body.next()) => next,
            };

            let bytes = match next {
                Err(_) => {
                    return Err(ChatError::Network(format!(
                        "stream idle for {}s",
                        self.idle_timeout.as_secs()
                    )));
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            for line in decoder.push(&bytes) {
                if self.handle_line(&line, assembler)? == Step::Finished {
                    return Ok(StreamOutcome::Completed);
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if self.handle_line(&line, assembler)? == Step::Finished {
                return Ok(StreamOutcome::Completed);
            }
        }

        if assembler.has_output() {
            warn!("Stream ended without a complete frame; keeping assembled output");
            Ok(StreamOutcome::Ended)
        } else {
            Err(ChatError::Protocol(
                "stream ended before any output".to_string(),
            ))
        }
    }

    /// Parse and dispatch one line. Only an `error` frame fails the exchange.
    fn handle_line(&self, line: &str, assembler: &mut MessageAssembler) -> Result<Step> {
        let event = match parse_frame(line) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(Step::Continue),
            Err(e) => {
                warn!("Skipping frame: {e}");
                return Ok(Step::Continue);
            }
        };
        trace!("Frame: {}", event.type_label());

        if let Some(state) = self.state {
            state.send_if_modified(|s| {
                if *s == ChatState::StreamingChunking {
                    false
                } else {
                    *s = ChatState::StreamingChunking;
                    true
                }
            });
        }

        match &event {
            StreamEvent::Start { conversation_id } => {
                match conversation_id.as_deref() {
                    Some(id) => self.sessions.adopt(id),
                    None => self.sessions.refresh(),
                }
            }
            StreamEvent::Unknown => debug!("Ignoring frame of unknown type"),
            _ => {}
        }

        let before = assembler.message().content.len();
        let step = assembler.apply(&event);

        match &event {
            StreamEvent::Chunk { .. } => {
                let appended = strip_artifacts(&assembler.message().content[before..]);
                if !appended.is_empty() {
                    self.emit(ExchangeUpdate::Chunk(appended));
                }
            }
            StreamEvent::Data { data } => self.emit(ExchangeUpdate::Data(data.clone())),
            StreamEvent::Chart { chart_config } => {
                self.emit(ExchangeUpdate::Chart(chart_config.clone()));
            }
            _ => {}
        }

        match step {
            Step::Failed(reason) => Err(ChatError::Stream(reason)),
            other => Ok(other),
        }
    }

    fn emit(&self, update: ExchangeUpdate) {
        if let Some(tx) = self.updates {
            // A dropped receiver only means nobody is rendering live.
            let _ = tx.send(update);
        }
    }
}

//! Builds an assistant message from stream events.

use serde_json::Value;
use tracing::{debug, warn};

use super::events::StreamEvent;
use crate::models::{AssembledMessage, ChatResponse, ResponseSource};
use crate::normalize::{normalize, normalize_list, strip_artifacts};

/// What the stream consumer should do after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading.
    Continue,
    /// A `complete` event arrived; stop reading.
    Finished,
    /// An `error` event arrived.
    Failed(String),
}

/// Mutates one in-progress assistant message as frames arrive.
#[derive(Debug)]
pub struct MessageAssembler {
    message: AssembledMessage,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            message: AssembledMessage::assistant(ResponseSource::Stream),
        }
    }

    pub const fn message(&self) -> &AssembledMessage {
        &self.message
    }

    /// Whether anything displayable has been assembled.
    pub fn has_output(&self) -> bool {
        !self.message.content.trim().is_empty()
            || self.message.data.is_some()
            || self.message.chart_config.is_some()
    }

    /// Apply one event. Events arriving after the message froze are ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> Step {
        if self.message.is_frozen() {
            warn!("Ignoring {} event after completion", event.type_label());
            return Step::Finished;
        }

        match event {
            StreamEvent::Start { .. } | StreamEvent::Unknown => Step::Continue,
            StreamEvent::Chunk { content } => {
                self.message.content.push_str(&chunk_text(content));
                Step::Continue
            }
            StreamEvent::Data { data } => {
                self.message.data = Some(data.clone());
                Step::Continue
            }
            StreamEvent::Chart { chart_config } => {
                self.message.chart_config = Some(chart_config.clone());
                Step::Continue
            }
            StreamEvent::Complete { result } => {
                if let Some(result) = result {
                    self.merge_result(result);
                }
                self.seal();
                Step::Finished
            }
            StreamEvent::Error { error } => Step::Failed(
                error
                    .clone()
                    .unwrap_or_else(|| "stream reported an error".to_string()),
            ),
        }
    }

    /// Merge the consolidated result over the streamed fields.
    ///
    /// The result's message replaces the chunked content only when it
    /// normalizes to something displayable.
    fn merge_result(&mut self, result: &ChatResponse) {
        let text = normalize(&result.message);
        if !text.trim().is_empty() {
            if text != self.message.content {
                debug!(
                    "Final result replaces {} streamed chars with {}",
                    self.message.content.len(),
                    text.len()
                );
            }
            self.message.content = text;
        }
        if let Some(sql) = result.sql_query.as_ref().filter(|s| !s.trim().is_empty()) {
            self.message.sql_query = Some(sql.clone());
        }
        if let Some(recommendations) = &result.recommendations {
            self.message.recommendations = normalize_list(recommendations);
        }
        if result.query_type.is_some() {
            self.message.query_type.clone_from(&result.query_type);
        }
    }

    /// Freeze and hand out the message, whatever state it reached.
    pub fn finish(mut self) -> AssembledMessage {
        self.seal();
        self.message
    }

    /// Artifacts are stripped from the whole text, not per chunk, so one
    /// split across two chunks is still caught.
    fn seal(&mut self) {
        if !self.message.is_frozen() {
            self.message.content = strip_artifacts(&self.message.content);
            self.message.freeze();
        }
    }
}

/// Text carried by a chunk. Plain strings are kept byte-for-byte; anything
/// structured goes through the normalizer.
fn chunk_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => normalize(other),
    }
}

//! Data models for conversations, sessions and backend health.

mod exchange;
mod health;
mod message;
mod session;

pub use exchange::{ChatRequest, ChatResponse};
pub use health::{BackendHealthState, HealthStatus};
pub use message::{AssembledMessage, MessageRole, ResponseSource};
pub use session::ConversationSession;

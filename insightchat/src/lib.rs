//! insightchat - client for a conversational analytics assistant.
//!
//! A question goes to the assistant's streaming endpoint when the backend is
//! reachable, is retried once without streaming if the stream fails, and is
//! answered from a canned table when neither works. Every path ends in a
//! displayable message.
//!
//! - [`chat`]: the orchestrator driving the three tiers
//! - [`stream`]: frame parsing and incremental message assembly
//! - [`normalize`]: turning heterogeneous payloads into display text
//! - [`session`]: the conversation id and its TTL-bound persistence
//! - [`health`]: periodic backend reachability
//! - [`server`]: a demo backend speaking the same protocol

pub mod backend;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod models;
pub mod normalize;
pub mod server;
pub mod session;
pub mod stream;

pub use error::{ChatError, Result};

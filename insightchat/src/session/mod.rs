//! Conversation session identity and its persistence.

mod kv;
mod store;

pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use store::{generate_conversation_id, SessionStore};

//! Servicing user queries through the stream, non-stream and fallback tiers.

mod orchestrator;
mod state;

pub use orchestrator::ChatOrchestrator;
pub use state::ChatState;

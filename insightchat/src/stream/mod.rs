//! Streaming exchange handling: frame parsing, line buffering, message
//! assembly.

mod assembler;
mod client;
mod decoder;
mod events;

pub use assembler::{MessageAssembler, Step};
pub use client::{ExchangeUpdate, StreamClient, StreamOutcome};
pub use decoder::LineDecoder;
pub use events::{parse_frame, StreamEvent, FRAME_PREFIX};

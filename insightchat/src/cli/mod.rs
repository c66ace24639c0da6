//! Command-line interface.

mod args;
mod commands;

pub use args::{Cli, Commands, SessionAction};
pub use commands::{execute, load_config};

//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// insightchat - ask the analytics assistant about your dealership data
#[derive(Parser, Debug)]
#[command(name = "insightchat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to <config dir>/insightchat/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Assistant API base URL, overriding the config
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Skip the backend and answer from the fallback table
    #[arg(long, global = true)]
    pub offline: bool,

    /// Use the single-request endpoint instead of streaming
    #[arg(long, global = true)]
    pub no_stream: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask one question and print the answer
    Ask {
        /// The question
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },

    /// Interactive conversation (/clear starts over, /quit exits)
    Chat,

    /// Probe the backend once and print its status
    Health,

    /// Inspect or reset the stored conversation
    Session {
        #[arg(value_enum)]
        action: SessionAction,
    },

    /// Run the demo assistant backend
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Delay between streamed words, in milliseconds
        #[arg(long, default_value = "40")]
        chunk_delay_ms: u64,

        /// Refuse the streaming endpoint to exercise the non-streaming retry
        #[arg(long)]
        fail_stream: bool,

        /// Insert an unparseable frame into every stream
        #[arg(long)]
        malformed_frames: bool,
    },
}

/// What to do with the stored conversation
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SessionAction {
    /// Print the current conversation id and its age
    Show,
    /// Forget the conversation; the next question starts a new one
    Clear,
}

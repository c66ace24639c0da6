//! CLI command execution.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::{ChatBackend, HttpBackend};
use crate::chat::ChatOrchestrator;
use crate::config::Config;
use crate::fallback::FallbackTable;
use crate::health::HealthMonitor;
use crate::models::{AssembledMessage, ResponseSource};
use crate::server::{self, DemoOptions, DemoState};
use crate::session::{FileStore, KeyValueStore, MemoryStore, SessionStore};
use crate::stream::ExchangeUpdate;

use super::args::{Cli, Commands, SessionAction};

/// Resolve the config file and apply command-line overrides.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default_path()
            .map(|path| Config::load_or_default(&path))
            .unwrap_or_default(),
    };

    if let Some(base_url) = &cli.base_url {
        config.backend.base_url.clone_from(base_url);
    }
    if cli.no_stream {
        config.backend.streaming = false;
    }
    Ok(config)
}

pub async fn execute(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Ask { message } => {
            let message = message.join(" ");
            if message.trim().is_empty() {
                bail!("Message is required for ask command");
            }
            ask(&config, cli.offline, &message).await
        }
        Commands::Chat => chat_loop(&config, cli.offline).await,
        Commands::Health => health(&config, cli.offline).await,
        Commands::Session { action } => session(&config, action),
        Commands::Serve {
            port,
            chunk_delay_ms,
            fail_stream,
            malformed_frames,
        } => {
            let options = DemoOptions {
                chunk_delay: Duration::from_millis(chunk_delay_ms),
                fail_stream,
                malformed_frames,
                ..DemoOptions::default()
            };
            let state = DemoState::new(fallback_table(&config)?, options);
            server::start_server(port, Arc::new(state)).await
        }
    }
}

/// Everything an exchange needs, built from config.
struct Client {
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<SessionStore>,
    health: Arc<HealthMonitor>,
}

impl Client {
    fn new(config: &Config, offline: bool) -> Result<Self> {
        let backend: Arc<dyn ChatBackend> = Arc::new(
            HttpBackend::new(&config.backend, &config.health)
                .context("Failed to create HTTP client")?,
        );
        let health = Arc::new(HealthMonitor::new(Arc::clone(&backend)));
        if offline {
            health.force_offline(true);
        }
        Ok(Self {
            backend,
            sessions: Arc::new(session_store(config)),
            health,
        })
    }

    fn orchestrator(
        &self,
        config: &Config,
        updates: mpsc::UnboundedSender<ExchangeUpdate>,
    ) -> Result<ChatOrchestrator> {
        Ok(ChatOrchestrator::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.sessions),
            Arc::clone(&self.health),
            fallback_table(config)?,
        )
        .with_streaming(config.backend.streaming)
        .with_idle_timeout(config.backend.stream_idle_timeout())
        .with_updates(updates))
    }
}

fn session_store(config: &Config) -> SessionStore {
    let store: Arc<dyn KeyValueStore> = match config.session.resolved_store_path() {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    SessionStore::new(store, config.session.ttl())
}

fn fallback_table(config: &Config) -> Result<FallbackTable> {
    match &config.fallback.table_path {
        Some(path) => FallbackTable::load(path)
            .with_context(|| format!("Failed to load fallback table from {}", path.display())),
        None => Ok(FallbackTable::builtin()),
    }
}

async fn ask(config: &Config, offline: bool, message: &str) -> Result<()> {
    let client = Client::new(config, offline)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut chat = client.orchestrator(config, tx)?;
    let reply = run_exchange(&mut chat, &mut rx, message).await?;
    print_reply(&reply.message, reply.printed_live);
    Ok(())
}

async fn chat_loop(config: &Config, offline: bool) -> Result<()> {
    let client = Client::new(config, offline)?;
    let monitor = client.health.spawn(config.health.interval());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut chat = client.orchestrator(config, tx)?;

    println!("Ask about sales, inventory, service or F&I. /clear starts over, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/clear" => println!("{}", clear_conversation(&mut chat)),
            text => {
                let reply = run_exchange(&mut chat, &mut rx, text).await?;
                print_reply(&reply.message, reply.printed_live);
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}

/// Reset the conversation for `/clear`. Storage trouble is reported but
/// never ends the session.
fn clear_conversation(chat: &mut ChatOrchestrator) -> String {
    match chat.clear_conversation() {
        Ok(()) => "Conversation cleared.".to_string(),
        Err(e) => {
            warn!("Failed to clear stored conversation: {e}");
            format!("Conversation cleared here, but the stored id could not be removed: {e}")
        }
    }
}

struct ExchangeResult {
    message: AssembledMessage,
    /// Whether any chunk text was already echoed while streaming.
    printed_live: bool,
}

/// Submit one question, echoing streamed text as it arrives. Ctrl-C stops the
/// stream and keeps what was received.
async fn run_exchange(
    chat: &mut ChatOrchestrator,
    rx: &mut mpsc::UnboundedReceiver<ExchangeUpdate>,
    text: &str,
) -> Result<ExchangeResult> {
    let cancel = CancellationToken::new();
    let mut printed_live = false;

    let submit = chat.submit_with_cancel(text, &cancel);
    tokio::pin!(submit);

    let message = loop {
        tokio::select! {
            result = &mut submit => break result.context("Failed to submit question")?.clone(),
            Some(update) = rx.recv() => printed_live |= echo_update(&update),
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
        }
    };
    while let Ok(update) = rx.try_recv() {
        printed_live |= echo_update(&update);
    }

    Ok(ExchangeResult {
        message,
        printed_live,
    })
}

fn echo_update(update: &ExchangeUpdate) -> bool {
    match update {
        ExchangeUpdate::Chunk(text) => {
            print!("{text}");
            std::io::stdout().flush().ok();
            true
        }
        ExchangeUpdate::Data(_) | ExchangeUpdate::Chart(_) => false,
    }
}

fn print_reply(message: &AssembledMessage, printed_live: bool) {
    if printed_live {
        println!();
    }
    // A failed stream may have echoed a partial answer that a later tier replaced.
    if !printed_live || message.source != ResponseSource::Stream {
        println!("{}", message.content);
    }
    for line in extras(message) {
        println!("{line}");
    }
}

/// Lines describing everything besides the answer text.
fn extras(message: &AssembledMessage) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(sql) = &message.sql_query {
        lines.push(String::new());
        lines.push("SQL:".to_string());
        lines.extend(sql.lines().map(|l| format!("  {l}")));
    }
    if let Some(data) = &message.data {
        lines.push(format!("Data: {}", describe_data(data)));
    }
    if let Some(chart) = &message.chart_config {
        let kind = chart
            .get("type")
            .or_else(|| chart.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or("custom");
        lines.push(format!("Chart: {kind}"));
    }
    if !message.recommendations.is_empty() {
        lines.push("Suggestions:".to_string());
        lines.extend(message.recommendations.iter().map(|r| format!("  - {r}")));
    }
    if message.source == ResponseSource::Fallback {
        lines.push("(offline answer)".to_string());
    }
    lines
}

fn describe_data(data: &Value) -> String {
    match data {
        Value::Array(rows) if rows.len() == 1 => "1 row".to_string(),
        Value::Array(rows) => format!("{} rows", rows.len()),
        Value::Object(map) => format!("{} fields", map.len()),
        other => other.to_string(),
    }
}

async fn health(config: &Config, offline: bool) -> Result<()> {
    let client = Client::new(config, offline)?;
    let status = client.health.probe().await;
    println!("{}: {status}", config.backend.base_url);
    Ok(())
}

fn session(config: &Config, action: SessionAction) -> Result<()> {
    let sessions = session_store(config);
    let location = config
        .session
        .resolved_store_path()
        .map_or_else(|| "memory".to_string(), |p: PathBuf| p.display().to_string());

    match action {
        SessionAction::Show => match sessions.current() {
            Some(session) => {
                let idle = Utc::now() - session.last_activity_at;
                let state = if session.is_live(Utc::now(), sessions.ttl()) {
                    "active"
                } else {
                    "expired"
                };
                println!("Conversation: {}", session.id);
                println!("  Started:       {}", session.created_at.to_rfc3339());
                println!(
                    "  Last activity: {} ({} min ago, {state})",
                    session.last_activity_at.to_rfc3339(),
                    idle.num_minutes()
                );
                println!("  Stored in:     {location}");
            }
            None => println!("No conversation yet ({location})"),
        },
        SessionAction::Clear => {
            sessions.clear().context("Failed to clear session")?;
            println!("Conversation cleared.");
        }
    }
    Ok(())
}

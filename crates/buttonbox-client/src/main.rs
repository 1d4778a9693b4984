//! ButtonBox client entry point.
//!
//! Loads the configuration, starts the heartbeat engine against the
//! configured companion, and reads commands from standard input so the
//! connection can be driven from a terminal.
//!
//! # Usage
//!
//! ```text
//! buttonbox-client [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Config file [default: platform config dir]
//!   --host   <HOST>   Companion host name or IP
//!   --port   <PORT>   Companion UDP port
//! ```
//!
//! | Variable           | Description                          |
//! |--------------------|--------------------------------------|
//! | `BUTTONBOX_CONFIG` | Config file path                     |
//! | `BUTTONBOX_HOST`   | Companion host (overrides the file)  |
//! | `BUTTONBOX_PORT`   | Companion port (overrides the file)  |
//! | `RUST_LOG`         | Log filter (overrides `log_level`)   |
//!
//! # Console commands
//!
//! ```text
//! send <payload>          send one MACRO_COMMAND
//! import <url>            ask the companion to open <url>
//! capture src|des         ask the companion to record the mouse position
//! loop start|stop         start or stop the companion's drag loop
//! endpoint <host> <port>  switch companion (saved to the config file)
//! clear                   forget the companion
//! retry                   rebuild the session for the current companion
//! status                  print state, counters and latency
//! quit                    stop and exit
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buttonbox_client::application::send_macro::SendError;
use buttonbox_client::infrastructure::endpoint_source::WatchEndpointSource;
use buttonbox_client::infrastructure::network::{EngineSnapshot, HeartbeatEngine};
use buttonbox_client::infrastructure::storage::config::{
    ClientConfig, ConfigStore, EndpointConfig,
};
use buttonbox_core::protocol::packet::{CapturePurpose, LoopAction};
use buttonbox_core::Endpoint;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ButtonBox remote macro trigger client.
#[derive(Debug, Parser)]
#[command(
    name = "buttonbox-client",
    about = "Heartbeat and command client for the ButtonBox companion",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "BUTTONBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Companion host name or IP address.
    #[arg(long, env = "BUTTONBOX_HOST")]
    host: Option<String>,

    /// Companion UDP port.
    #[arg(long, env = "BUTTONBOX_PORT")]
    port: Option<u16>,
}

impl Cli {
    fn config_store(&self) -> anyhow::Result<ConfigStore> {
        match &self.config {
            Some(path) => Ok(ConfigStore::new(path)),
            None => ConfigStore::at_default_location()
                .context("no --config given and no platform config directory"),
        }
    }

    /// Overlays `--host`/`--port` onto the endpoint from the file.
    fn apply_overrides(&self, config: &mut ClientConfig) {
        if self.host.is_none() && self.port.is_none() {
            return;
        }
        let current = config.endpoint.clone().unwrap_or(EndpointConfig {
            host: String::new(),
            port: 0,
        });
        config.endpoint = Some(EndpointConfig {
            host: self.host.clone().unwrap_or(current.host),
            port: self.port.unwrap_or(current.port),
        });
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Send(String),
    Import(String),
    Capture(CapturePurpose),
    Loop(LoopAction),
    Endpoint(Endpoint),
    Clear,
    Retry,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match verb {
        "send" if !rest.is_empty() => Ok(ConsoleCommand::Send(rest.to_string())),
        "send" => Err("usage: send <payload>".to_string()),
        "import" if !rest.is_empty() => Ok(ConsoleCommand::Import(rest.to_string())),
        "import" => Err("usage: import <url>".to_string()),
        "capture" => match rest.to_ascii_lowercase().as_str() {
            "src" => Ok(ConsoleCommand::Capture(CapturePurpose::Source)),
            "des" => Ok(ConsoleCommand::Capture(CapturePurpose::Destination)),
            _ => Err("usage: capture src|des".to_string()),
        },
        "loop" => match rest.to_ascii_lowercase().as_str() {
            "start" => Ok(ConsoleCommand::Loop(LoopAction::Start)),
            "stop" => Ok(ConsoleCommand::Loop(LoopAction::Stop)),
            _ => Err("usage: loop start|stop".to_string()),
        },
        "endpoint" => {
            let mut parts = rest.split_whitespace();
            let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("usage: endpoint <host> <port>".to_string());
            };
            let port: u16 = port
                .parse()
                .map_err(|_| format!("invalid port: {port:?}"))?;
            Endpoint::new(host, port)
                .map(ConsoleCommand::Endpoint)
                .ok_or_else(|| "endpoint needs a host and a non-zero port".to_string())
        }
        "clear" => Ok(ConsoleCommand::Clear),
        "retry" => Ok(ConsoleCommand::Retry),
        "status" => Ok(ConsoleCommand::Status),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command: {other:?}")),
    }
}

fn report_auxiliary(result: Result<uuid::Uuid, SendError>) {
    match result {
        Ok(id) => info!(%id, "request sent"),
        Err(e) => warn!(error = %e, "request not sent"),
    }
}

fn format_status(snapshot: &EngineSnapshot) -> String {
    let endpoint = snapshot
        .endpoint
        .as_ref()
        .map_or_else(|| "-".to_string(), Endpoint::to_string);
    let latency = snapshot
        .latest_response_time_ms
        .map_or_else(|| "-".to_string(), |ms| format!("{ms} ms"));
    format!(
        "state: {}\nendpoint: {}\nsuccesses: {}  failures: {}\npending pings: {}  pending commands: {}\nlatency: {}",
        snapshot.state,
        endpoint,
        snapshot.consecutive_successes,
        snapshot.consecutive_failures,
        snapshot.pending_pings,
        snapshot.pending_commands,
        latency,
    )
}

fn persist_endpoint(store: &ConfigStore, config: &mut ClientConfig, endpoint: Option<&Endpoint>) {
    config.set_endpoint(endpoint);
    if let Err(e) = store.save(config) {
        warn!(error = %e, "could not save config");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let store = cli.config_store()?;
    let mut config = store
        .load()
        .with_context(|| format!("failed to load config from {}", store.path().display()))?;
    cli.apply_overrides(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    info!(config = %store.path().display(), "ButtonBox client starting");
    if config.endpoint.is_some() && config.endpoint().is_none() {
        warn!("configured endpoint is incomplete; waiting for `endpoint <host> <port>`");
    }

    let engine = HeartbeatEngine::new(config.heartbeat_settings());
    let source = WatchEndpointSource::new(config.endpoint());
    engine.start(&source);
    let channel = engine.command_channel();

    // ── State change logger ───────────────────────────────────────────────────
    let publisher = engine.publisher();
    let mut states = publisher.observe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(%state, latency_ms = ?publisher.latest_response_time_ms(), "connection state");
        }
    });

    // ── Console loop ──────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C; shutting down");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(ConsoleCommand::Send(payload)) => {
                let state = engine.state();
                if state.is_configured() && !state.is_usable() {
                    warn!(%state, "link not confirmed; command may be lost");
                }
                match channel.send(&payload).await {
                    Ok(id) => info!(%id, "command sent"),
                    Err(e) => warn!(error = %e, "command not sent"),
                }
            }
            Ok(ConsoleCommand::Import(url)) => {
                report_auxiliary(channel.send_trigger_import(&url).await);
            }
            Ok(ConsoleCommand::Capture(purpose)) => {
                report_auxiliary(channel.send_capture_mouse_position(purpose).await);
            }
            Ok(ConsoleCommand::Loop(action)) => {
                report_auxiliary(channel.send_auto_drag_loop(action).await);
            }
            Ok(ConsoleCommand::Endpoint(endpoint)) => {
                persist_endpoint(&store, &mut config, Some(&endpoint));
                source.set(Some(endpoint));
            }
            Ok(ConsoleCommand::Clear) => {
                persist_endpoint(&store, &mut config, None);
                source.set(None);
            }
            Ok(ConsoleCommand::Retry) => {
                if let Err(e) = engine.reconnect().await {
                    error!(error = %e, "reconnect failed");
                }
            }
            Ok(ConsoleCommand::Status) => println!("{}", format_status(&engine.snapshot())),
            Ok(ConsoleCommand::Quit) => break,
            Err(message) => eprintln!("{message}"),
        }
    }

    engine.stop().await;
    info!("ButtonBox client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

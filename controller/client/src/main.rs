//! mini-ufo terminal client
//!
//! Line-oriented front end for the session controller. Generation output is
//! written to stdout; status, plans and notices go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Interactive, default endpoint
//! controller-client
//!
//! # One prompt, then keep the session open for follow-ups
//! controller-client "a clock app in tkinter"
//!
//! # Plan first, against a local backend
//! controller-client --plan-first --endpoint ws://localhost:8000/ws/generate
//!
//! # Verbose logging
//! RUST_LOG=debug controller-client
//! ```
//!
//! Closing stdin waits for the running generation to finish, then exits.

mod display;
mod input;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use controller_core::transport::WebSocketTransport;
use controller_core::{
    load_config_from_path, ConfigOverrides, ControllerCommand, ControllerMessage, HttpSessionStore,
    SessionController,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use display::{Renderer, StdoutSink};
use input::{parse_line, InputCommand, HELP};

/// mini-ufo client - stream code generation from the backend
#[derive(Parser, Debug)]
#[command(name = "controller-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Generation endpoint (ws:// or wss://)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Base URL of the session storage API
    #[arg(long, value_name = "URL")]
    api_base: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "UFO_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ask for a plan before implementing
    #[arg(short = 'p', long)]
    plan_first: bool,

    /// Prose debounce window in milliseconds
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "UFO_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prompt to submit once connected
    prompt: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(endpoint) = &self.endpoint {
            overrides = overrides.with_endpoint(endpoint.clone());
        }
        if let Some(base) = &self.api_base {
            overrides = overrides.with_api_base(base.clone());
        }
        if self.plan_first {
            overrides = overrides.with_plan_first(true);
        }
        if let Some(ms) = self.debounce_ms {
            overrides = overrides.with_debounce_ms(ms);
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout stays clean for generated output.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "controller_client={level},controller_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = load_config_from_path(args.config.clone()).context("loading configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        endpoint = %config.transport.endpoint,
        api_base = %config.api_base,
        source = %config.source(),
        "Client starting"
    );

    let transport = WebSocketTransport::new(&config.transport);
    let store = HttpSessionStore::new(&config.api_base, config.request_timeout)
        .context("building session storage client")?;

    let (messages_tx, messages_rx) = mpsc::channel::<ControllerMessage>(256);
    let controller = SessionController::new(
        transport,
        config.transport.clone(),
        store,
        &config.controller(),
        messages_tx,
    );
    let handle = controller.spawn();
    handle
        .send(ControllerCommand::AttachSink(Box::new(StdoutSink::new())))
        .await?;

    let (renderer, mut busy) = Renderer::new(tokio::io::stderr(), handle.commands(), args.prompt);
    let render_task = tokio::spawn(renderer.run(messages_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();
    let mut interrupted = false;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        };
        let Some(line) = line else { break };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(InputCommand::Quit)) => break,
            Ok(Some(InputCommand::Help)) => {
                stderr.write_all(HELP.as_bytes()).await?;
            }
            Ok(Some(command)) => {
                if let Some(command) = command.into_command() {
                    handle.send(command).await?;
                }
            }
            Err(e) => {
                stderr.write_all(format!("{e}\n").as_bytes()).await?;
            }
        }
    }

    if !interrupted && *busy.borrow() {
        info!("Input closed; waiting for the running generation");
        tokio::select! {
            _ = busy.wait_for(|running| !*running) => {}
            _ = signal::ctrl_c() => {}
        }
    }

    let stats = handle.shutdown().await?;
    match render_task.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Status output failed"),
        Err(e) => warn!(error = %e, "Renderer task failed"),
    }

    info!(
        frames = stats.frames_received,
        protocol_errors = stats.protocol_errors,
        runs = stats.runs_started,
        failed = stats.runs_failed,
        saves = stats.saves_triggered + stats.manual_saves,
        reconnects = stats.connection.reconnects_scheduled,
        "Client stopped"
    );
    Ok(())
}

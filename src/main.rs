#![forbid(unsafe_code)]

//! `agent-relay`: Slack bridge for a command-line coding agent.
//!
//! Bootstraps configuration, starts the Slack Socket Mode integration, the
//! IPC server for `agent-relay-ctl`, and the optional health endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::health;
use agent_relay::ipc::server::spawn_ipc_server;
use agent_relay::models::key::ReplyContext;
use agent_relay::orchestrator::bridge::{Bridge, BridgeConfig};
use agent_relay::render::chat::{ChatClient, Markup};
use agent_relay::slack::client::SlackService;
use agent_relay::state::AppState;
use agent_relay::{AppError, Result};

/// Environment variable holding the shared secret for IPC commands.
const IPC_TOKEN_ENV: &str = "AGENT_RELAY_IPC_TOKEN";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Slack bridge for a coding agent CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default workspace root for unmapped channels.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.default_workspace_root = canonical;
    }

    config.load_credentials().await?;
    let config = Arc::new(config);
    info!(
        workspace = %config.default_workspace_root().display(),
        mapped_channels = config.workspaces.len(),
        "configuration loaded"
    );

    // ── Slack + bridge ──────────────────────────────────
    let slack = Arc::new(SlackService::new(&config.slack)?);
    let bridge = Arc::new(Bridge::new(
        Arc::clone(&slack),
        BridgeConfig::from_config(&config),
    ));
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        bridge: Arc::clone(&bridge),
    });

    let ct = CancellationToken::new();
    let socket_handle = slack.spawn_socket_mode(Arc::clone(&state));
    info!("slack socket mode started");

    // ── IPC server ──────────────────────────────────────
    let ipc_token = std::env::var(IPC_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    if ipc_token.is_none() {
        warn!("{IPC_TOKEN_ENV} not set; IPC commands are accepted without authentication");
    }
    let ipc_handle = spawn_ipc_server(Arc::clone(&state), ipc_token, ct.clone())?;

    // ── Health endpoint ─────────────────────────────────
    let health_handle = config.health_port.map(|port| {
        let bridge = Arc::clone(&bridge);
        let ct = ct.clone();
        tokio::spawn(async move {
            if let Err(err) = health::serve_health(bridge, port, ct).await {
                error!(%err, "health endpoint failed");
            }
        })
    });

    notify(&slack, &config, "\u{1f7e2} agent-relay is online.").await;

    shutdown_signal().await;
    info!("shutdown signal received");

    graceful_shutdown(&state, &slack, &ct).await;

    if let Err(err) = ipc_handle.await {
        error!(%err, "ipc task join failed");
    }
    if let Some(handle) = health_handle {
        if let Err(err) = handle.await {
            error!(%err, "health task join failed");
        }
    }
    socket_handle.abort();

    info!("agent-relay shut down");
    Ok(())
}

/// Stop accepting work, stop live runs, and tell the operator channel.
async fn graceful_shutdown(state: &AppState, slack: &SlackService, ct: &CancellationToken) {
    ct.cancel();

    let status = state.bridge.status();
    if !status.runs.is_empty() {
        info!(runs = status.runs.len(), "stopping live runs");
    }
    state.bridge.shutdown().await;

    notify(slack, &state.config, "\u{1f534} agent-relay is shutting down.").await;
}

/// Post `text` to the configured notification channel, if any.
async fn notify(slack: &SlackService, config: &GlobalConfig, text: &str) {
    let Some(channel) = config.slack.notify_channel_id.as_deref() else {
        return;
    };
    let target = ReplyContext::channel(channel);
    if let Err(err) = slack.create_message(&target, text, Markup::Plain).await {
        warn!(%err, "failed to post notification");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

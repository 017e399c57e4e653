//! Local IPC server for `agent-relay-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them onto the bridge.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "stop", "actor": "U123", "workspace": "/srv/repo"}
//! {"command": "stop-all", "actor": "U123"}
//! {"command": "drain", "actor": "U123", "workspace": "/srv/repo"}
//! {"command": "discard", "actor": "U123", "workspace": "/srv/repo"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "missing required 'actor' field"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::key::ConcurrencyKey;
use crate::orchestrator::bridge::Bridge;
use crate::render::chat::ChatClient;
use crate::state::AppState;
use crate::{AppError, Result};

/// Inbound IPC request from `agent-relay-ctl`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Chat user the command targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Workspace directory the command targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Shared-secret authentication token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Outbound IPC response to `agent-relay-ctl`.
#[derive(Debug, Deserialize, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<AppState>,
    auth_token: Option<String>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let auth_token: Arc<Option<String>> = Arc::new(auth_token);
    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let bridge = Arc::clone(&state.bridge);
                                let auth_token = Arc::clone(&auth_token);
                                tokio::spawn(handle_connection(stream, bridge, auth_token));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection<C: ChatClient>(
    stream: interprocess::local_socket::tokio::Stream,
    bridge: Arc<Bridge<C>>,
    auth_token: Arc<Option<String>>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => {
                            dispatch_command(&request, &bridge, auth_token.as_deref()).await
                        }
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command onto the bridge.
///
/// When `expected_token` is set, requests must carry the same token.
pub async fn dispatch_command<C: ChatClient>(
    request: &IpcRequest,
    bridge: &Arc<Bridge<C>>,
    expected_token: Option<&str>,
) -> IpcResponse {
    if let Some(expected) = expected_token {
        if request.auth_token.as_deref() != Some(expected) {
            warn!(command = %request.command, "IPC request rejected: invalid auth token");
            return IpcResponse::error("unauthorized");
        }
    }

    info!(command = %request.command, "ipc command");

    match request.command.as_str() {
        "list" => match serde_json::to_value(bridge.status()) {
            Ok(status) => IpcResponse::success(status),
            Err(err) => IpcResponse::error(format!("failed to encode status: {err}")),
        },
        "stop" => match target_key(request) {
            Ok(key) => {
                let stopped = bridge.cancel(&key);
                IpcResponse::success(serde_json::json!({ "key": key.to_string(), "stopped": stopped }))
            }
            Err(err) => IpcResponse::error(err.to_string()),
        },
        "stop-all" => match request.actor.as_deref() {
            Some(actor) => {
                let stopped = bridge.cancel_all(actor);
                IpcResponse::success(serde_json::json!({ "actor": actor, "stopped": stopped }))
            }
            None => IpcResponse::error("missing required 'actor' field"),
        },
        "drain" => match target_key(request) {
            Ok(key) => {
                let drained = bridge.force_drain(&key);
                IpcResponse::success(serde_json::json!({ "key": key.to_string(), "drained": drained }))
            }
            Err(err) => IpcResponse::error(err.to_string()),
        },
        "discard" => match target_key(request) {
            Ok(key) => {
                let discarded = bridge.abort_and_discard(&key).await;
                IpcResponse::success(
                    serde_json::json!({ "key": key.to_string(), "discarded": discarded }),
                )
            }
            Err(err) => IpcResponse::error(err.to_string()),
        },
        other => IpcResponse::error(format!("unknown command: {other}")),
    }
}

/// Concurrency key named by `actor` and `workspace`.
fn target_key(request: &IpcRequest) -> Result<ConcurrencyKey> {
    let actor = request
        .actor
        .as_deref()
        .ok_or_else(|| AppError::Ipc("missing required 'actor' field".into()))?;
    let workspace = request
        .workspace
        .as_deref()
        .ok_or_else(|| AppError::Ipc("missing required 'workspace' field".into()))?;
    let raw = PathBuf::from(workspace);
    let workspace = raw.canonicalize().unwrap_or(raw);
    Ok(ConcurrencyKey::new(actor, workspace))
}

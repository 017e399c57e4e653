//! Optional HTTP health endpoint.
//!
//! `GET /health` returns the bridge status as JSON: live runs and queue
//! depths. Bound to loopback only.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::models::run::BridgeStatus;
use crate::orchestrator::bridge::Bridge;
use crate::render::chat::ChatClient;
use crate::{AppError, Result};

/// Body of a `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Number of live runs.
    pub live_runs: usize,
    /// Number of queued submissions across all keys.
    pub queued: usize,
    /// Full status snapshot.
    #[serde(flatten)]
    pub detail: BridgeStatus,
}

/// Build the health report for `bridge`.
#[must_use]
pub fn health_report<C: ChatClient>(bridge: &Bridge<C>) -> HealthReport {
    let detail = bridge.status();
    HealthReport {
        status: "ok",
        live_runs: detail.runs.len(),
        queued: detail.queues.iter().map(|queue| queue.depth).sum(),
        detail,
    }
}

async fn health<C: ChatClient>(State(bridge): State<Arc<Bridge<C>>>) -> Json<HealthReport> {
    Json(health_report(&bridge))
}

/// Router exposing `GET /health`.
pub fn router<C: ChatClient>(bridge: Arc<Bridge<C>>) -> Router {
    Router::new()
        .route("/health", get(health::<C>))
        .with_state(bridge)
}

/// Serve the health endpoint on `127.0.0.1:port` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails to bind.
pub async fn serve_health<C: ChatClient>(
    bridge: Arc<Bridge<C>>,
    port: u16,
    ct: CancellationToken,
) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind health endpoint on {bind}: {err}")))?;

    info!(%bind, "serving health endpoint");

    axum::serve(listener, router(bridge))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("health server error: {err}")))?;

    info!("health endpoint shut down");
    Ok(())
}

//! Shared application state handed to the Slack, IPC, and health surfaces.

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::orchestrator::bridge::Bridge;
use crate::slack::client::SlackService;

/// Process-wide shared state.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Submission bridge backed by the Slack chat client.
    pub bridge: Arc<Bridge<SlackService>>,
}

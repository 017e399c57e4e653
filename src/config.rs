//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::orchestrator::spawner::SpawnConfig;
use crate::render::renderer::RenderConfig;
use crate::{AppError, Result};

/// Keychain service name holding the Slack tokens.
pub const KEYRING_SERVICE: &str = "agent-relay";

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Channel that receives startup and shutdown notices, if any.
    #[serde(default)]
    pub notify_channel_id: Option<String>,
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Run lifetime limits, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Wall-clock ceiling for one agent run.
    #[serde(default = "default_run_seconds")]
    pub run_seconds: u64,
    /// Time between the graceful stop signal and a forced kill.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            run_seconds: default_run_seconds(),
            grace_seconds: default_grace_seconds(),
        }
    }
}

fn default_run_seconds() -> u64 {
    600
}

fn default_grace_seconds() -> u64 {
    5
}

/// Output rendering limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RenderSettings {
    /// Largest message body in bytes (Slack section text limit).
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Minimum milliseconds between edits of one message.
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
    /// Period of the pending-edit tick, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on captured agent stderr, in bytes.
    #[serde(default = "default_max_diagnostic_bytes")]
    pub max_diagnostic_bytes: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            edit_interval_ms: default_edit_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_diagnostic_bytes: default_max_diagnostic_bytes(),
        }
    }
}

fn default_max_message_chars() -> usize {
    3000
}

fn default_edit_interval_ms() -> u64 {
    1500
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_diagnostic_bytes() -> usize {
    2000
}

fn default_host_cli() -> String {
    "claude".into()
}

fn default_host_cli_args() -> Vec<String> {
    [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--include-partial-messages",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_resume_flag() -> String {
    "--resume".into()
}

fn default_env_passthrough() -> Vec<String> {
    vec!["ANTHROPIC_API_KEY".into()]
}

fn default_ipc_name() -> String {
    "agent-relay".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Workspace used for channels without an explicit mapping.
    pub default_workspace_root: PathBuf,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Slack user IDs allowed to submit work and control runs.
    pub authorized_user_ids: Vec<String>,
    /// Agent CLI binary.
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Arguments placed before the prompt.
    #[serde(default = "default_host_cli_args")]
    pub host_cli_args: Vec<String>,
    /// Flag preceding a resume token.
    #[serde(default = "default_resume_flag")]
    pub resume_flag: String,
    /// Environment variables passed through to the agent.
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Local socket name for the control interface.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Port for the `/health` endpoint; disabled when absent.
    #[serde(default)]
    pub health_port: Option<u16>,
    /// Channel ID to workspace directory.
    #[serde(default)]
    pub workspaces: HashMap<String, PathBuf>,
    /// Run lifetime limits.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Output rendering limits.
    #[serde(default)]
    pub render: RenderSettings,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// Tries the [`KEYRING_SERVICE`] keychain service first, then falls
    /// back to `SLACK_APP_TOKEN` / `SLACK_BOT_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Absolute path to the default workspace root.
    #[must_use]
    pub fn default_workspace_root(&self) -> &Path {
        &self.default_workspace_root
    }

    /// Workspace directory for submissions from `channel_id`.
    #[must_use]
    pub fn workspace_for_channel(&self, channel_id: &str) -> PathBuf {
        self.workspaces
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| self.default_workspace_root.clone())
    }

    /// Validate that a Slack user is authorized to use the bridge.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not in the allowed list.
    pub fn ensure_authorized(&self, user_id: &str) -> Result<()> {
        if self.authorized_user_ids.iter().any(|id| id == user_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not authorized".into()))
        }
    }

    /// Process launch settings derived from this configuration.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            host_cli: self.host_cli.clone(),
            host_cli_args: self.host_cli_args.clone(),
            resume_flag: self.resume_flag.clone(),
            env_passthrough: self.env_passthrough.clone(),
            grace_period: Duration::from_secs(self.timeouts.grace_seconds),
            max_diagnostic_bytes: self.render.max_diagnostic_bytes,
        }
    }

    /// Renderer settings derived from this configuration.
    #[must_use]
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            max_message_chars: self.render.max_message_chars,
            edit_interval: Duration::from_millis(self.render.edit_interval_ms),
            poll_interval: Duration::from_millis(self.render.poll_interval_ms),
        }
    }

    /// Wall-clock ceiling for one run.
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.run_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.authorized_user_ids.is_empty() {
            return Err(AppError::Config(
                "authorized_user_ids must not be empty".into(),
            ));
        }

        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }

        if self.timeouts.run_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.run_seconds must be greater than zero".into(),
            ));
        }

        if self.render.max_message_chars < 100 {
            return Err(AppError::Config(
                "render.max_message_chars must be at least 100".into(),
            ));
        }

        if self.render.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "render.poll_interval_ms must be greater than zero".into(),
            ));
        }

        self.default_workspace_root = self
            .default_workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_workspace_root invalid: {err}")))?;

        for (channel, path) in &mut self.workspaces {
            *path = path.canonicalize().map_err(|err| {
                AppError::Config(format!("workspace for channel {channel} invalid: {err}"))
            })?;
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "credential {keyring_key} not found in keychain or {env_key} env var"
            ))
        })
}

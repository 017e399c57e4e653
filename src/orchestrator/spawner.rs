//! Agent process spawner.
//!
//! Launches the agent CLI with:
//! - `kill_on_drop(true)` so a dropped child never outlives its run.
//! - `env_clear()` plus an allowlist, so chat tokens and other secrets in
//!   the bridge's environment are never visible to the agent.
//! - Its own process group on Unix, so a stop reaches any subprocesses the
//!   agent started.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::orchestrator::registry::RunRequest;
use crate::{AppError, Result};

/// Environment variables inherited by the agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How the agent CLI is launched and torn down.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent CLI binary (e.g. `claude`).
    pub host_cli: String,
    /// Arguments placed before the prompt; select incremental structured output.
    pub host_cli_args: Vec<String>,
    /// Flag that precedes a resume token (e.g. `--resume`).
    pub resume_flag: String,
    /// Extra variables passed through on top of [`ALLOWED_ENV_VARS`].
    pub env_passthrough: Vec<String>,
    /// Time between the graceful stop signal and a forced kill.
    pub grace_period: Duration,
    /// Upper bound on retained stderr bytes.
    pub max_diagnostic_bytes: usize,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            host_cli: "claude".into(),
            host_cli_args: vec![
                "-p".into(),
                "--output-format".into(),
                "stream-json".into(),
                "--verbose".into(),
                "--include-partial-messages".into(),
            ],
            resume_flag: "--resume".into(),
            env_passthrough: vec!["ANTHROPIC_API_KEY".into()],
            grace_period: Duration::from_secs(5),
            max_diagnostic_bytes: 2000,
        }
    }
}

/// Full argument list for one run: configured args, optional resume flag
/// and token, then the prompt.
#[must_use]
pub fn build_args(config: &SpawnConfig, request: &RunRequest) -> Vec<String> {
    let mut args = config.host_cli_args.clone();
    if let Some(token) = request.resume_token.as_deref().filter(|t| !t.is_empty()) {
        args.push(config.resume_flag.clone());
        args.push(token.to_owned());
    }
    args.push(request.prompt.clone());
    args
}

/// Start the agent in `workspace` with piped stdout and stderr.
///
/// # Errors
///
/// Returns `AppError::Spawn` when the OS refuses to start the process.
pub fn spawn_agent(config: &SpawnConfig, workspace: &Path, request: &RunRequest) -> Result<Child> {
    let mut cmd = Command::new(&config.host_cli);
    cmd.args(build_args(config, request));

    cmd.env_clear();
    for key in ALLOWED_ENV_VARS
        .iter()
        .copied()
        .chain(config.env_passthrough.iter().map(String::as_str))
    {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to start `{}` in {}: {err}",
            config.host_cli,
            workspace.display()
        ))
    })?;

    debug!(pid = ?child.id(), workspace = %workspace.display(), "agent process started");
    Ok(child)
}

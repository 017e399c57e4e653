//! Run lifecycle outcomes and status snapshots.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::key::ConcurrencyKey;

/// Why a run was asked to stop before exiting on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator requested the stop (cancel, force-drain, shutdown).
    User,
    /// The run exceeded its wall-clock ceiling.
    Timeout,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Agent exited with status zero.
    Completed,
    /// The run was stopped by the caller or by its timeout.
    Stopped(StopReason),
    /// Agent could not be launched or exited with a failure status.
    Failed {
        /// Process exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured diagnostic output, truncated when excessive.
        diagnostics: String,
    },
}

/// Point-in-time view of a live run, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    /// Key the run holds.
    pub key: ConcurrencyKey,
    /// Unique run identifier.
    pub run_id: Uuid,
    /// When the run's slot was acquired.
    pub started_at: DateTime<Utc>,
    /// Pending stop reason, if a stop was requested.
    pub stopping: Option<StopReason>,
}

/// Queue depth for one key, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Key the entries are waiting on.
    pub key: ConcurrencyKey,
    /// Number of queued submissions.
    pub depth: usize,
}

/// Combined bridge status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStatus {
    /// Live runs.
    pub runs: Vec<RunSnapshot>,
    /// Non-empty queues.
    pub queues: Vec<QueueSnapshot>,
}

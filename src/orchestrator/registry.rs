//! Per-key process registry.
//!
//! Tracks at most one live run per [`ConcurrencyKey`]. A run's lifetime is
//! bounded by its [`RunSlot`]: acquiring the slot inserts the entry, and
//! dropping it removes the entry and fires the run's completion signal.
//! Since the supervisor task owns the slot, every exit path (normal exit,
//! cancellation, timeout, spawn failure, or a panic unwinding through the
//! supervisor) releases the key exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::event::DomainEvent;
use crate::models::key::ConcurrencyKey;
use crate::models::run::{RunOutcome, RunSnapshot, StopReason};
use crate::orchestrator::lock;
use crate::orchestrator::spawner::SpawnConfig;
use crate::orchestrator::supervisor;
use crate::{AppError, Result};

/// Default wall-clock ceiling for one run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

type RunMap = HashMap<ConcurrencyKey, Arc<RunControl>>;

// ── Run control ──────────────────────────────────────────────────────────────

/// Shared control handle for one live run.
#[derive(Debug)]
pub struct RunControl {
    run_id: Uuid,
    key: ConcurrencyKey,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    done: CancellationToken,
    reason: Mutex<Option<StopReason>>,
}

impl RunControl {
    fn new(key: ConcurrencyKey) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            key,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// Unique identifier of this run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Key the run holds.
    #[must_use]
    pub fn key(&self) -> &ConcurrencyKey {
        &self.key
    }

    /// Ask the run to stop. The first recorded reason wins.
    ///
    /// Returns `true` when this call recorded the reason.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let recorded = {
            let mut slot = lock(&self.reason);
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason);
                true
            }
        };
        self.cancel.cancel();
        recorded
    }

    /// Reason recorded by [`Self::request_stop`], if any.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        *lock(&self.reason)
    }

    /// Token fired when a stop is requested.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the run has fully torn down.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolve once the run has fully torn down.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }

    /// Status view of this run.
    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            key: self.key.clone(),
            run_id: self.run_id,
            started_at: self.started_at,
            stopping: self.stop_reason(),
        }
    }
}

// ── Slot guard ───────────────────────────────────────────────────────────────

/// Exclusive reservation of a key in the registry.
///
/// Dropping the slot removes the registry entry (only if it still belongs
/// to this run) and fires the completion signal.
#[derive(Debug)]
pub struct RunSlot {
    runs: Arc<Mutex<RunMap>>,
    control: Arc<RunControl>,
}

impl RunSlot {
    /// Key this slot reserves.
    #[must_use]
    pub fn key(&self) -> &ConcurrencyKey {
        &self.control.key
    }

    /// Control handle of the reserved run.
    #[must_use]
    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        {
            let mut runs = lock(&self.runs);
            if runs
                .get(&self.control.key)
                .is_some_and(|live| live.run_id == self.control.run_id)
            {
                runs.remove(&self.control.key);
            }
        }
        self.control.done.cancel();
        debug!(key = %self.control.key, run_id = %self.control.run_id, "run slot released");
    }
}

// ── Run request / stream ─────────────────────────────────────────────────────

/// Parameters for launching one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Prompt text handed to the agent.
    pub prompt: String,
    /// Session token of a previous run on the same key, to resume from.
    pub resume_token: Option<String>,
    /// Wall-clock ceiling for the run.
    pub timeout: Duration,
}

impl RunRequest {
    /// Request with the default timeout and no resume token.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            resume_token: None,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Consumer side of a launched run.
#[derive(Debug)]
pub struct RunStream {
    /// Events in emission order; closes once the output stream is drained.
    pub events: mpsc::UnboundedReceiver<DomainEvent>,
    /// Terminal outcome, sent once the process has exited.
    pub outcome: oneshot::Receiver<RunOutcome>,
    /// Control handle of the run.
    pub control: Arc<RunControl>,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Registry of live runs keyed by [`ConcurrencyKey`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    runs: Arc<Mutex<RunMap>>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `key` for a new run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` if a run is already live for `key`.
    pub fn acquire(&self, key: &ConcurrencyKey) -> Result<RunSlot> {
        let mut runs = lock(&self.runs);
        if runs.contains_key(key) {
            return Err(AppError::Busy(format!("a run is already live for {key}")));
        }
        let control = Arc::new(RunControl::new(key.clone()));
        runs.insert(key.clone(), Arc::clone(&control));
        Ok(RunSlot {
            runs: Arc::clone(&self.runs),
            control,
        })
    }

    /// Launch the agent for a reserved slot.
    ///
    /// On failure the slot is released before returning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the agent process cannot be started.
    pub fn spawn(&self, slot: RunSlot, request: RunRequest, config: &SpawnConfig) -> Result<RunStream> {
        info!(key = %slot.key(), run_id = %slot.control().run_id(), "starting agent run");
        supervisor::start_run(slot, request, config)
    }

    /// Whether a run is live for `key`.
    #[must_use]
    pub fn is_live(&self, key: &ConcurrencyKey) -> bool {
        lock(&self.runs).contains_key(key)
    }

    /// Control handle of the live run for `key`, if any.
    #[must_use]
    pub fn handle(&self, key: &ConcurrencyKey) -> Option<Arc<RunControl>> {
        lock(&self.runs).get(key).cloned()
    }

    /// Request a user stop of the run for `key`. Never blocks.
    ///
    /// Returns `true` when a live run was signalled.
    pub fn cancel(&self, key: &ConcurrencyKey) -> bool {
        match self.handle(key) {
            Some(control) => {
                control.request_stop(StopReason::User);
                info!(%key, "run stop requested");
                true
            }
            None => false,
        }
    }

    /// Request a user stop of every run owned by `actor`.
    ///
    /// Returns the number of runs signalled.
    pub fn cancel_all(&self, actor: &str) -> usize {
        let targets: Vec<Arc<RunControl>> = lock(&self.runs)
            .values()
            .filter(|control| control.key.actor == actor)
            .cloned()
            .collect();
        for control in &targets {
            control.request_stop(StopReason::User);
        }
        info!(actor, count = targets.len(), "stop requested for all runs of actor");
        targets.len()
    }

    /// Request a user stop of every live run.
    pub fn cancel_every(&self) -> usize {
        let targets: Vec<Arc<RunControl>> = lock(&self.runs).values().cloned().collect();
        for control in &targets {
            control.request_stop(StopReason::User);
        }
        targets.len()
    }

    /// Resolve once no run is live for `key`.
    ///
    /// Resolves immediately when the key is idle.
    pub async fn await_quiescence(&self, key: &ConcurrencyKey) {
        if let Some(control) = self.handle(key) {
            control.finished().await;
        }
    }

    /// Snapshot of all live runs.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = lock(&self.runs)
            .values()
            .map(|control| control.snapshot())
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }
}

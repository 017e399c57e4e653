//! Run supervision: exit, cancellation, and timeout handling.
//!
//! One supervisor task per run owns the child process and the run's
//! [`RunSlot`]. It waits for whichever comes first (process exit, a stop
//! request, or the timeout), tears the process down gracefully when
//! needed, drains the output tasks, and reports the terminal outcome.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::models::event::DomainEvent;
use crate::models::run::{RunOutcome, StopReason};
use crate::orchestrator::registry::{RunRequest, RunSlot, RunStream};
use crate::orchestrator::spawner::{self, SpawnConfig};
use crate::stream::reader::run_reader;
use crate::{AppError, Result};

/// Launch the agent for `slot` and start its supervisor task.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be started or its pipes
/// cannot be captured. The slot is released in either case.
pub fn start_run(slot: RunSlot, request: RunRequest, config: &SpawnConfig) -> Result<RunStream> {
    let control = Arc::clone(slot.control());
    let mut child = spawner::spawn_agent(config, slot.key().workspace(), &request)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    let span = info_span!("run", key = %slot.key(), run_id = %control.run_id());

    let (event_tx, events) = mpsc::unbounded_channel();
    let (outcome_tx, outcome) = oneshot::channel();

    let reader = tokio::spawn(run_reader(stdout, event_tx.clone()).instrument(span.clone()));
    let diagnostics = tokio::spawn(capture_diagnostics(stderr, config.max_diagnostic_bytes));

    let supervised = Supervised {
        slot,
        child,
        reader,
        diagnostics,
        event_tx,
        outcome_tx,
        timeout: request.timeout,
        grace: config.grace_period,
    };
    tokio::spawn(supervise(supervised).instrument(span));

    Ok(RunStream {
        events,
        outcome,
        control,
    })
}

struct Supervised {
    slot: RunSlot,
    child: Child,
    reader: JoinHandle<usize>,
    diagnostics: JoinHandle<String>,
    event_tx: mpsc::UnboundedSender<DomainEvent>,
    outcome_tx: oneshot::Sender<RunOutcome>,
    timeout: Duration,
    grace: Duration,
}

async fn supervise(run: Supervised) {
    let Supervised {
        slot,
        mut child,
        mut reader,
        mut diagnostics,
        event_tx,
        outcome_tx,
        timeout,
        grace,
    } = run;
    let control = Arc::clone(slot.control());
    let cancel = control.cancel_token();

    let status = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(%err, "error waiting for agent process");
                None
            }
        },
        () = cancel.cancelled() => {
            info!(reason = ?control.stop_reason(), "stopping agent process");
            terminate(&mut child, grace).await
        }
        () = tokio::time::sleep(timeout) => {
            control.request_stop(StopReason::Timeout);
            warn!(timeout_secs = timeout.as_secs(), "agent run timed out");
            terminate(&mut child, grace).await
        }
    };

    let stderr_text = match tokio::time::timeout(grace, &mut diagnostics).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            warn!(%err, "stderr capture task failed");
            String::new()
        }
        Err(_) => {
            diagnostics.abort();
            warn!("stderr still open after process exit, abandoning capture");
            String::new()
        }
    };

    if tokio::time::timeout(grace, &mut reader).await.is_err() {
        reader.abort();
        warn!("stdout still open after process exit, abandoning reader");
    }

    let outcome = match (control.stop_reason(), status) {
        (Some(reason), _) => RunOutcome::Stopped(reason),
        (None, Some(status)) if status.success() => RunOutcome::Completed,
        (None, status) => RunOutcome::Failed {
            exit_code: status.and_then(|s| s.code()),
            diagnostics: stderr_text,
        },
    };

    if let RunOutcome::Failed {
        exit_code,
        diagnostics,
    } = &outcome
    {
        let _ = event_tx.send(DomainEvent::Error {
            message: failure_message(*exit_code, diagnostics),
        });
    }
    drop(event_tx);

    info!(outcome = ?outcome, "agent run finished");
    drop(slot);
    let _ = outcome_tx.send(outcome);
}

/// Stop the child: graceful signal, then a forced kill after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
    #[cfg(not(unix))]
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to signal agent process");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "agent process exited after stop signal");
            Some(status)
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for agent process");
            None
        }
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "agent process did not exit within grace period, forcing kill"
            );
            #[cfg(unix)]
            signal_group(child, nix::sys::signal::Signal::SIGKILL);
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill agent process");
            }
            child.wait().await.ok()
        }
    }
}

/// Signal the child's whole process group.
#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid), signal) {
        warn!(%err, ?signal, "failed to signal agent process group");
    }
}

/// Read `stderr` to end of stream, keeping at most `max_bytes`.
///
/// When output exceeds the limit, the kept prefix is followed by a note
/// with the number of dropped bytes.
pub async fn capture_diagnostics<R>(mut stderr: R, max_bytes: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::with_capacity(max_bytes.min(8192));
    let mut dropped = 0_usize;
    let mut buf = [0_u8; 8192];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = max_bytes.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&buf[..take]);
                dropped += n - take;
            }
            Err(err) => {
                warn!(%err, "failed reading agent stderr");
                break;
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).trim_end().to_owned();
    if dropped > 0 {
        text.push_str(&format!("\n\u{2026} ({dropped} bytes truncated)"));
    }
    text
}

fn failure_message(exit_code: Option<i32>, diagnostics: &str) -> String {
    let status = exit_code.map_or_else(
        || "agent process was terminated by a signal".to_owned(),
        |code| format!("agent exited with code {code}"),
    );
    if diagnostics.trim().is_empty() {
        status
    } else {
        format!("{status}\n```\n{diagnostics}\n```")
    }
}

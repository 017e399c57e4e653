//! Bridge between chat submissions and agent runs.
//!
//! [`Bridge::submit`] either starts a run for the submission's key or
//! queues it behind the live one. Each started run gets one driver task
//! that renders the run's events, waits for the process to tear down, and
//! then drains whatever queued up meanwhile as a single batched run, until
//! the key's queue is empty.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::event::DomainEvent;
use crate::models::key::{ConcurrencyKey, ReplyContext};
use crate::models::run::{BridgeStatus, RunOutcome};
use crate::orchestrator::lock;
use crate::orchestrator::queue::{Admission, Batch, QueueEntry, SubmissionQueue};
use crate::orchestrator::registry::{
    ProcessRegistry, RunRequest, RunSlot, RunStream, DEFAULT_RUN_TIMEOUT,
};
use crate::orchestrator::spawner::SpawnConfig;
use crate::render::chat::{ChatClient, Markup, MessageRef};
use crate::render::renderer::{RenderConfig, Renderer};
use crate::{AppError, Result};

/// Settings the bridge passes down to runs and renderers.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How agent processes are launched.
    pub spawn: SpawnConfig,
    /// Renderer limits and pacing.
    pub render: RenderConfig,
    /// Wall-clock ceiling per run.
    pub run_timeout: Duration,
}

impl BridgeConfig {
    /// Derive bridge settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            spawn: config.spawn_config(),
            render: config.render_config(),
            run_timeout: config.run_timeout(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            spawn: SpawnConfig::default(),
            render: RenderConfig::default(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// What [`Bridge::submit`] did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A run started; `batched` submissions were combined into it.
    Started {
        /// Number of submissions in the run's input.
        batched: usize,
    },
    /// The key was busy; the submission waits at position `depth`.
    Queued {
        /// Queue depth including this submission.
        depth: usize,
    },
}

/// Text of the queue-depth indicator message.
#[must_use]
pub fn queue_indicator_text(depth: usize) -> String {
    let noun = if depth == 1 { "message" } else { "messages" };
    format!("\u{23f3} {depth} {noun} queued. They will run together when the current run finishes.")
}

/// Routes submissions to runs, one live run per key.
pub struct Bridge<C: ChatClient> {
    chat: Arc<C>,
    registry: ProcessRegistry,
    queue: SubmissionQueue,
    config: BridgeConfig,
    sessions: Mutex<HashMap<ConcurrencyKey, String>>,
    tasks: TaskTracker,
    shutting_down: AtomicBool,
}

impl<C: ChatClient> Bridge<C> {
    /// Create a bridge posting through `chat`.
    pub fn new(chat: Arc<C>, config: BridgeConfig) -> Self {
        Self {
            chat,
            registry: ProcessRegistry::new(),
            queue: SubmissionQueue::new(),
            config,
            sessions: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Process registry backing this bridge.
    #[must_use]
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Submission queue backing this bridge.
    #[must_use]
    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    /// Start a run for `text`, or queue it if `key` is busy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` once shutdown has begun.
    pub async fn submit(
        self: &Arc<Self>,
        key: ConcurrencyKey,
        text: String,
        origin: ReplyContext,
    ) -> Result<SubmitOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::Busy("bridge is shutting down".into()));
        }

        let entry = QueueEntry {
            key: key.clone(),
            payload: text,
            origin: origin.clone(),
        };

        match self.queue.admit(entry, |k| self.registry.acquire(k)) {
            Admission::Start { slot, batch } => {
                let batched = batch.len();
                info!(%key, batched, "submission started a run");
                self.start(slot, batch);
                Ok(SubmitOutcome::Started { batched })
            }
            Admission::Queued { depth, indicator } => {
                info!(%key, depth, "submission queued");
                self.show_queue_depth(&key, &origin, depth, indicator).await;
                Ok(SubmitOutcome::Queued { depth })
            }
        }
    }

    /// Stop the live run for `key`; queued submissions run next.
    pub fn cancel(&self, key: &ConcurrencyKey) -> bool {
        self.registry.cancel(key)
    }

    /// Stop every live run owned by `actor`.
    pub fn cancel_all(&self, actor: &str) -> usize {
        self.registry.cancel_all(actor)
    }

    /// Run queued submissions now: stops the live run if there is one,
    /// otherwise starts the queued batch directly.
    ///
    /// Returns `false` when there was nothing to stop or drain.
    pub fn force_drain(self: &Arc<Self>, key: &ConcurrencyKey) -> bool {
        if self.registry.cancel(key) {
            return true;
        }
        match self.queue.drain_next(key, |k| self.registry.acquire(k)) {
            Some((slot, batch)) => {
                info!(%key, batched = batch.len(), "force-draining idle queue");
                self.start(slot, batch);
                true
            }
            None => false,
        }
    }

    /// Drop everything queued for `key` and stop its live run.
    ///
    /// Returns the number of discarded submissions.
    pub async fn abort_and_discard(&self, key: &ConcurrencyKey) -> usize {
        let (discarded, indicator) = self.queue.discard(key);
        self.registry.cancel(key);
        if let Some(message) = indicator {
            self.delete_quietly(&message).await;
        }
        info!(%key, discarded, "queue discarded");
        discarded
    }

    /// Forget the resume token for `key`; the next run starts fresh.
    pub fn reset_session(&self, key: &ConcurrencyKey) -> bool {
        lock(&self.sessions).remove(key).is_some()
    }

    /// Resume token that the next run on `key` would use.
    #[must_use]
    pub fn session_token(&self, key: &ConcurrencyKey) -> Option<String> {
        lock(&self.sessions).get(key).cloned()
    }

    /// Live runs and queue depths.
    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            runs: self.registry.snapshot(),
            queues: self.queue.snapshot(),
        }
    }

    /// Stop accepting work, stop every live run, and wait for all driver
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let stopped = self.registry.cancel_every();
        info!(stopped, "bridge shutting down");
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn start(self: &Arc<Self>, slot: RunSlot, batch: Batch) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move { this.drive(slot, batch).await });
    }

    async fn drive(self: Arc<Self>, slot: RunSlot, batch: Batch) {
        let key = batch.key.clone();
        let mut next = Some((slot, batch));

        while let Some((slot, mut batch)) = next.take() {
            if let Some(indicator) = batch.indicator.take() {
                self.delete_quietly(&indicator).await;
            }
            self.run_once(slot, &batch).await;

            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            next = self.queue.drain_next(&key, |k| self.registry.acquire(k));
            if let Some((_, batch)) = &next {
                info!(%key, batched = batch.len(), "draining queued submissions");
            }
        }
        debug!(%key, "run driver finished");
    }

    async fn run_once(&self, slot: RunSlot, batch: &Batch) {
        let key = batch.key.clone();
        let Some(origin) = batch.origin().cloned() else {
            return;
        };
        let request = RunRequest {
            prompt: batch.payload(),
            resume_token: self.session_token(&key),
            timeout: self.config.run_timeout,
        };
        let mut renderer =
            Renderer::new(Arc::clone(&self.chat), origin, self.config.render.clone());

        let RunStream {
            mut events,
            outcome,
            control,
        } = match self.registry.spawn(slot, request, &self.config.spawn) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%key, error = %err, "agent run could not start");
                renderer
                    .handle(DomainEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                renderer
                    .finish(&RunOutcome::Failed {
                        exit_code: None,
                        diagnostics: String::new(),
                    })
                    .await;
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.config.render.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let DomainEvent::Completion { session_token: Some(token), .. } = &event {
                            lock(&self.sessions).insert(key.clone(), token.clone());
                        }
                        renderer.handle(event).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => renderer.tick().await,
            }
        }

        let outcome = outcome.await.unwrap_or_else(|_| {
            warn!(%key, "run supervisor ended without an outcome");
            RunOutcome::Failed {
                exit_code: None,
                diagnostics: String::new(),
            }
        });
        control.finished().await;
        renderer.finish(&outcome).await;
        info!(%key, run_id = %control.run_id(), ?outcome, "run complete");
    }

    async fn show_queue_depth(
        &self,
        key: &ConcurrencyKey,
        origin: &ReplyContext,
        depth: usize,
        indicator: Option<MessageRef>,
    ) {
        if let Some(message) = indicator {
            if let Err(err) = self
                .chat
                .edit_message(&message, &queue_indicator_text(depth), Markup::Plain)
                .await
            {
                debug!(error = %err, "failed to update queue indicator");
            }
            return;
        }
        if depth != 1 {
            // The first queued submission owns posting the indicator.
            return;
        }

        let message = match self
            .chat
            .create_message(origin, &queue_indicator_text(depth), Markup::Plain)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "failed to post queue indicator");
                return;
            }
        };

        match self.queue.attach_indicator(key, message.clone()) {
            Some(current) if current != depth => {
                if let Err(err) = self
                    .chat
                    .edit_message(&message, &queue_indicator_text(current), Markup::Plain)
                    .await
                {
                    debug!(error = %err, "failed to correct queue indicator");
                }
            }
            Some(_) => {}
            None => self.delete_quietly(&message).await,
        }
    }

    async fn delete_quietly(&self, message: &MessageRef) {
        if let Err(err) = self.chat.delete_message(message).await {
            debug!(error = %err, "failed to delete message");
        }
    }
}

//! Per-key submission queue.
//!
//! Submissions that arrive while their key is busy wait here in FIFO order.
//! When the key frees up, all waiting entries leave together as one
//! [`Batch`] whose payload joins them with [`BATCH_SEPARATOR`].
//!
//! Admission and drain decisions take the queue lock first and call the
//! registry's acquire while holding it, so an entry can never be appended
//! after the final drain check of a finishing run and left behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::key::{ConcurrencyKey, ReplyContext};
use crate::models::run::QueueSnapshot;
use crate::orchestrator::lock;
use crate::orchestrator::registry::RunSlot;
use crate::render::chat::MessageRef;
use crate::Result;

/// Separator placed between batched payloads.
pub const BATCH_SEPARATOR: &str = "\n\n---\n\n";

/// One pending submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Key the submission targets.
    pub key: ConcurrencyKey,
    /// Prompt text.
    pub payload: String,
    /// Where the submission came from; replies go here.
    pub origin: ReplyContext,
}

/// Entries that leave the queue together.
#[derive(Debug)]
pub struct Batch {
    /// Key shared by every entry.
    pub key: ConcurrencyKey,
    /// Entries in submission order; never empty.
    pub entries: Vec<QueueEntry>,
    /// Queue-depth indicator posted for these entries, if any.
    pub indicator: Option<MessageRef>,
}

impl Batch {
    /// Combined prompt: payloads in submission order joined by
    /// [`BATCH_SEPARATOR`].
    #[must_use]
    pub fn payload(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.payload.as_str())
            .collect::<Vec<_>>()
            .join(BATCH_SEPARATOR)
    }

    /// Reply context of the most recent entry.
    #[must_use]
    pub fn origin(&self) -> Option<&ReplyContext> {
        self.entries.last().map(|entry| &entry.origin)
    }

    /// Number of entries in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of [`SubmissionQueue::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The key was free: run `batch` now under `slot`.
    Start {
        /// Reservation of the key.
        slot: RunSlot,
        /// The new entry, preceded by any leftovers still queued.
        batch: Batch,
    },
    /// The key is busy; the entry was appended.
    Queued {
        /// Queue depth including the new entry.
        depth: usize,
        /// Indicator message already posted for this queue, if any.
        indicator: Option<MessageRef>,
    },
}

#[derive(Debug, Default)]
struct KeyQueue {
    entries: Vec<QueueEntry>,
    indicator: Option<MessageRef>,
}

/// FIFO queues of pending submissions, one per key.
#[derive(Debug, Clone, Default)]
pub struct SubmissionQueue {
    inner: Arc<Mutex<HashMap<ConcurrencyKey, KeyQueue>>>,
}

impl SubmissionQueue {
    /// Create an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `entry` immediately if `try_acquire` grants its key, otherwise
    /// append it.
    pub fn admit<F>(&self, entry: QueueEntry, try_acquire: F) -> Admission
    where
        F: FnOnce(&ConcurrencyKey) -> Result<RunSlot>,
    {
        let mut queues = lock(&self.inner);
        match try_acquire(&entry.key) {
            Ok(slot) => {
                let key = entry.key.clone();
                let leftover = queues.remove(&key).unwrap_or_default();
                let mut entries = leftover.entries;
                entries.push(entry);
                Admission::Start {
                    slot,
                    batch: Batch {
                        key,
                        entries,
                        indicator: leftover.indicator,
                    },
                }
            }
            Err(_) => {
                let queue = queues.entry(entry.key.clone()).or_default();
                queue.entries.push(entry);
                let depth = queue.entries.len();
                debug!(depth, "submission queued behind live run");
                Admission::Queued {
                    depth,
                    indicator: queue.indicator.clone(),
                }
            }
        }
    }

    /// Append `entry` unconditionally; returns the new depth.
    pub fn enqueue(&self, entry: QueueEntry) -> usize {
        let mut queues = lock(&self.inner);
        let queue = queues.entry(entry.key.clone()).or_default();
        queue.entries.push(entry);
        queue.entries.len()
    }

    /// Take everything queued for `key` if `try_acquire` grants the key.
    ///
    /// Returns `None` without calling `try_acquire` when nothing is queued.
    pub fn drain_next<F>(&self, key: &ConcurrencyKey, try_acquire: F) -> Option<(RunSlot, Batch)>
    where
        F: FnOnce(&ConcurrencyKey) -> Result<RunSlot>,
    {
        let mut queues = lock(&self.inner);
        if !queues.get(key).is_some_and(|queue| !queue.entries.is_empty()) {
            queues.remove(key);
            return None;
        }
        let slot = try_acquire(key).ok()?;
        let queue = queues.remove(key)?;
        Some((
            slot,
            Batch {
                key: key.clone(),
                entries: queue.entries,
                indicator: queue.indicator,
            },
        ))
    }

    /// Record the indicator message for `key`'s queue.
    ///
    /// Returns the current depth when attached. Returns `None` when the
    /// queue has already drained or already has an indicator; the caller
    /// should then delete `message`.
    pub fn attach_indicator(&self, key: &ConcurrencyKey, message: MessageRef) -> Option<usize> {
        let mut queues = lock(&self.inner);
        let queue = queues.get_mut(key)?;
        if queue.entries.is_empty() || queue.indicator.is_some() {
            return None;
        }
        queue.indicator = Some(message);
        Some(queue.entries.len())
    }

    /// Drop everything queued for `key`.
    ///
    /// Returns the number of entries dropped and the indicator to clean up.
    pub fn discard(&self, key: &ConcurrencyKey) -> (usize, Option<MessageRef>) {
        match lock(&self.inner).remove(key) {
            Some(queue) => (queue.entries.len(), queue.indicator),
            None => (0, None),
        }
    }

    /// Number of entries waiting on `key`.
    #[must_use]
    pub fn depth(&self, key: &ConcurrencyKey) -> usize {
        lock(&self.inner)
            .get(key)
            .map_or(0, |queue| queue.entries.len())
    }

    /// Depth of every non-empty queue.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueSnapshot> {
        let mut queues: Vec<QueueSnapshot> = lock(&self.inner)
            .iter()
            .filter(|(_, queue)| !queue.entries.is_empty())
            .map(|(key, queue)| QueueSnapshot {
                key: key.clone(),
                depth: queue.entries.len(),
            })
            .collect();
        queues.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        queues
    }
}

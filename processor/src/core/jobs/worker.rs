//! Task pull loop: polls the queue and dispatches admitted tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{parse_entry, JobRunner, Slot, SlotPool};
use crate::core::pipeline::{panic_message, JobOutcome};
use crate::core::storage::{QueueEntry, TaskStatus, TaskStore};

/// Polls a [`TaskStore`] queue and runs each entry through a [`JobRunner`].
///
/// At most one entry is popped per tick, and only when a slot is free. The
/// slot travels with the spawned job and is released when the job ends,
/// however it ends.
pub struct TaskPullLoop {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn JobRunner>,
    slots: SlotPool,
    interval: Duration,
    queue_key: String,
}

impl TaskPullLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn JobRunner>,
        slots: SlotPool,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            slots,
            interval,
            queue_key: "task_queue".to_string(),
        }
    }

    /// Queue name used in log lines.
    pub fn with_queue_key(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = queue_key.into();
        self
    }

    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    /// Pull until `shutdown` is notified.
    ///
    /// Jobs already running are left to finish on their own.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let shutdown_signal = shutdown.notified();
        tokio::pin!(shutdown_signal);
        shutdown_signal.as_mut().enable();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Task pull loop started on {} (interval {:?}, {} slots)",
            self.queue_key,
            self.interval,
            self.slots.capacity()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    tracing::info!(
                        "Task pull loop shutting down ({} jobs still running)",
                        self.slots.in_use()
                    );
                    break;
                }
                _ = ticker.tick() => {
                    self.pull_once().await;
                }
            }
        }
    }

    /// One poll. Returns the handle of the dispatched job, if any.
    pub async fn pull_once(&self) -> Option<JoinHandle<()>> {
        let Some(slot) = self.slots.try_acquire() else {
            tracing::debug!("Max concurrency reached, skipping pull");
            return None;
        };

        let raw = match self.store.pop_task().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to pop from {}: {}", self.queue_key, e);
                return None;
            }
        };

        let entry = match parse_entry(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Dropping queue entry: {}", e);
                return None;
            }
        };

        tracing::info!(
            "Admitted task {} ({}/{} slots in use)",
            entry.task_id,
            self.slots.in_use(),
            self.slots.capacity()
        );

        Some(spawn_job(
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
            entry,
            slot,
        ))
    }
}

/// Run `entry` on its own task, holding `slot` until it finishes.
fn spawn_job(
    runner: Arc<dyn JobRunner>,
    store: Arc<dyn TaskStore>,
    entry: QueueEntry,
    slot: Slot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _slot = slot;
        let task_id = entry.task_id.clone();

        let job = tokio::spawn(async move { runner.run(entry).await });

        match job.await {
            Ok(JobOutcome::Completed { result_path }) => {
                tracing::info!("Task {} completed: {}", task_id, result_path.display());
            }
            Ok(JobOutcome::Failed { error }) => {
                tracing::warn!("Task {} failed: {}", task_id, error);
            }
            Err(e) if e.is_panic() => {
                let message = format!("panic: {}", panic_message(&*e.into_panic()));
                tracing::error!("Task {} panicked: {}", task_id, message);
                record_failure(store.as_ref(), &task_id, &message).await;
            }
            Err(e) => {
                tracing::error!("Task {} was cancelled: {}", task_id, e);
            }
        }
    })
}

async fn record_failure(store: &dyn TaskStore, task_id: &str, message: &str) {
    if let Err(e) = store.update_error(task_id, message).await {
        tracing::error!("Task {}: failed to record error: {}", task_id, e);
    }
    if let Err(e) = store.update_status(task_id, TaskStatus::Failed).await {
        tracing::error!("Task {}: failed to mark FAILED: {}", task_id, e);
    }
}

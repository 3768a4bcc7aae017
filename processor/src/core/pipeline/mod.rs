//! Pipeline Orchestrator
//!
//! Drives one translation job through its ordered stages and records the
//! outcome on the task. Errors and panics never leave [`Orchestrator::run_job`];
//! they end up as a FAILED status with a readable message.

mod segments;
mod workflow;

pub use segments::*;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::core::composer::{AudioComposer, SegmentTiming};
use crate::core::ffmpeg::MediaToolkit;
use crate::core::jobs::JobRunner;
use crate::core::remote::{AiAdaptor, AudioSeparator};
use crate::core::settings::ProcessorConfig;
use crate::core::storage::{PathManager, QueueEntry, TaskStatus, TaskStore};
use crate::core::{CoreError, SpeakerId, TimeSec};

// =============================================================================
// Segment
// =============================================================================

/// One recognized utterance and the artifacts derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub speaker_id: SpeakerId,
    pub text: String,
    pub translated_text: String,
    pub start: TimeSec,
    pub end: TimeSec,
    /// Cut of the source vocals for this utterance
    pub audio_segment_path: PathBuf,
}

impl Segment {
    pub fn duration_secs(&self) -> TimeSec {
        self.end - self.start
    }

    pub fn timing(&self) -> SegmentTiming {
        SegmentTiming::new(self.start, self.end)
    }
}

// =============================================================================
// Job Outcome
// =============================================================================

/// How a job run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { result_path: PathBuf },
    Failed { error: String },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Knobs the orchestrator takes from the processor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub cleanup_intermediate: bool,
    /// Segments handled at once in the remote per-segment loops
    pub segment_concurrency: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            cleanup_intermediate: true,
            segment_concurrency: 1,
        }
    }
}

impl From<&ProcessorConfig> for OrchestratorOptions {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            cleanup_intermediate: config.cleanup_intermediate,
            segment_concurrency: config.segment_concurrency.max(1),
        }
    }
}

/// Runs the translation workflow for queue entries.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    media: Arc<dyn MediaToolkit>,
    composer: AudioComposer,
    ai: Arc<dyn AiAdaptor>,
    separator: Option<Arc<dyn AudioSeparator>>,
    paths: PathManager,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        media: Arc<dyn MediaToolkit>,
        ai: Arc<dyn AiAdaptor>,
        paths: PathManager,
    ) -> Self {
        Self {
            store,
            composer: AudioComposer::new(Arc::clone(&media)),
            media,
            ai,
            separator: None,
            paths,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_separator(mut self, separator: Arc<dyn AudioSeparator>) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn with_options(mut self, mut options: OrchestratorOptions) -> Self {
        options.segment_concurrency = options.segment_concurrency.max(1);
        self.options = options;
        self
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    /// Run one job to a terminal state.
    ///
    /// The task is marked PROCESSING first. If that write is rejected the job
    /// is not started and the task is left as it was.
    pub async fn run_job(&self, entry: &QueueEntry) -> JobOutcome {
        let task_id = entry.task_id.as_str();

        if let Err(e) = self.store.update_status(task_id, TaskStatus::Processing).await {
            tracing::error!("Task {}: failed to mark PROCESSING: {}", task_id, e);
            return JobOutcome::Failed {
                error: e.to_string(),
            };
        }
        tracing::info!("Task {}: processing {}", task_id, entry.original_file_path);

        let result = AssertUnwindSafe(self.execute(entry))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(CoreError::Panic(panic_message(&*payload))));

        match result {
            Ok(result_path) => self.complete(task_id, result_path).await,
            Err(e) => {
                let message = e.to_string();
                self.fail(task_id, &message).await;
                JobOutcome::Failed { error: message }
            }
        }
    }

    async fn complete(&self, task_id: &str, result_path: PathBuf) -> JobOutcome {
        if let Err(e) = self.store.update_status(task_id, TaskStatus::Completed).await {
            let message = format!("failed to mark task completed: {e}");
            tracing::error!("Task {}: {}", task_id, message);
            self.fail(task_id, &message).await;
            return JobOutcome::Failed { error: message };
        }
        tracing::info!("Task {}: completed, result {}", task_id, result_path.display());

        if self.options.cleanup_intermediate {
            if let Err(e) = self.paths.cleanup_intermediate(task_id) {
                tracing::warn!("Task {}: failed to clean intermediate files: {}", task_id, e);
            }
        }
        JobOutcome::Completed { result_path }
    }

    /// Record `message` and move the task to FAILED. Store errors are only logged.
    async fn fail(&self, task_id: &str, message: &str) {
        tracing::error!("Task {}: failed: {}", task_id, message);
        if let Err(e) = self.store.update_error(task_id, message).await {
            tracing::error!("Task {}: failed to record error: {}", task_id, e);
        }
        if let Err(e) = self.store.update_status(task_id, TaskStatus::Failed).await {
            tracing::error!("Task {}: failed to mark FAILED: {}", task_id, e);
        }
    }
}

#[async_trait]
impl JobRunner for Orchestrator {
    async fn run(&self, entry: QueueEntry) -> JobOutcome {
        self.run_job(&entry).await
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Task Storage
//!
//! Task records, the work queue and the runtime settings snapshot live behind
//! [`TaskStore`]. Two backends are provided:
//! - [`MemoryTaskStore`] for embedded runs and tests
//! - [`FileTaskStore`] for a storage directory shared between the processor
//!   service and the CLI
//!
//! [`PathManager`] derives every per-task file location.

mod file;
mod memory;
mod paths;

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;
pub use paths::PathManager;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{now_rfc3339, CoreError, CoreResult, TaskId};

/// Flat field map of a task record, the shape the store persists.
pub type TaskFields = HashMap<String, String>;

// Field names of the persisted task record.
pub const FIELD_TASK_ID: &str = "task_id";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_ORIGINAL_FILE_PATH: &str = "original_file_path";
pub const FIELD_RESULT_FILE_PATH: &str = "result_file_path";
pub const FIELD_ERROR_MESSAGE: &str = "error_message";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";

// =============================================================================
// Task Status
// =============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses only move forward: PENDING -> PROCESSING -> COMPLETED | FAILED.
    ///
    /// A task that could not start may also fail straight from PENDING.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(CoreError::Storage(format!("unknown task status: {other}"))),
        }
    }
}

// =============================================================================
// Task Record
// =============================================================================

/// Typed view over the persisted fields of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub original_file_path: String,
    pub result_file_path: String,
    pub error_message: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRecord {
    /// A fresh PENDING record.
    pub fn new_pending(task_id: &str, original_file_path: &str) -> Self {
        let now = now_rfc3339();
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            original_file_path: original_file_path.to_string(),
            result_file_path: String::new(),
            error_message: String::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn to_fields(&self) -> TaskFields {
        HashMap::from([
            (FIELD_TASK_ID.to_string(), self.task_id.clone()),
            (FIELD_STATUS.to_string(), self.status.to_string()),
            (
                FIELD_ORIGINAL_FILE_PATH.to_string(),
                self.original_file_path.clone(),
            ),
            (
                FIELD_RESULT_FILE_PATH.to_string(),
                self.result_file_path.clone(),
            ),
            (FIELD_ERROR_MESSAGE.to_string(), self.error_message.clone()),
            (FIELD_CREATED_AT.to_string(), self.created_at.clone()),
            (FIELD_UPDATED_AT.to_string(), self.updated_at.clone()),
        ])
    }

    pub fn from_fields(fields: &TaskFields) -> CoreResult<Self> {
        let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let status = fields
            .get(FIELD_STATUS)
            .ok_or_else(|| CoreError::Storage("task record has no status".to_string()))?
            .parse()?;

        Ok(Self {
            task_id: get(FIELD_TASK_ID),
            status,
            original_file_path: get(FIELD_ORIGINAL_FILE_PATH),
            result_file_path: get(FIELD_RESULT_FILE_PATH),
            error_message: get(FIELD_ERROR_MESSAGE),
            created_at: get(FIELD_CREATED_AT),
            updated_at: get(FIELD_UPDATED_AT),
        })
    }
}

// =============================================================================
// Queue Entry
// =============================================================================

/// Message pushed onto the work queue for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub original_file_path: String,
}

impl QueueEntry {
    /// Parse a raw queue message. An empty `task_id` is rejected.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let entry: QueueEntry = serde_json::from_str(raw)
            .map_err(|e| CoreError::MalformedEntry(format!("{e}: {raw}")))?;
        if entry.task_id.trim().is_empty() {
            return Err(CoreError::MalformedEntry(format!("empty task_id: {raw}")));
        }
        Ok(entry)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Field Update Helpers
// =============================================================================

/// Set `updated_at` to now, never moving it backwards.
pub(crate) fn touch(fields: &mut TaskFields) {
    let now = chrono::Utc::now();
    let keep_previous = fields
        .get(FIELD_UPDATED_AT)
        .and_then(|prev| chrono::DateTime::parse_from_rfc3339(prev).ok())
        .is_some_and(|prev| prev > now);
    if !keep_previous {
        fields.insert(FIELD_UPDATED_AT.to_string(), now.to_rfc3339());
    }
}

/// Apply a status change to an existing record, enforcing monotone transitions.
pub(crate) fn apply_status(
    task_id: &str,
    fields: &mut TaskFields,
    next: TaskStatus,
) -> CoreResult<()> {
    let current: TaskStatus = fields
        .get(FIELD_STATUS)
        .ok_or_else(|| CoreError::Storage(format!("task {task_id} has no status")))?
        .parse()?;
    if !current.can_transition_to(next) {
        return Err(CoreError::InvalidStatusTransition {
            task_id: task_id.to_string(),
            from: current,
            to: next,
        });
    }
    fields.insert(FIELD_STATUS.to_string(), next.to_string());
    touch(fields);
    Ok(())
}

// =============================================================================
// Task Store
// =============================================================================

/// Persistent queue + record store the core talks to.
///
/// Implementations must make `pop_task` atomic (no two callers observe the
/// same entry) and each multi-field write atomic.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Pop the oldest queue entry, `None` when the queue is empty.
    async fn pop_task(&self) -> CoreResult<Option<String>>;

    /// Append a raw entry to the queue.
    async fn push_task(&self, raw: &str) -> CoreResult<()>;

    /// Read all fields of a task. Fails with `TaskNotFound` when absent.
    async fn get_task_fields(&self, task_id: &str) -> CoreResult<TaskFields>;

    /// Write several fields at once, creating the record if needed, and stamp `updated_at`.
    async fn set_task_fields(&self, task_id: &str, fields: TaskFields) -> CoreResult<()>;

    /// Move a task to `status`, rejecting non-monotone transitions.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> CoreResult<()>;

    /// Record an error message on a task.
    async fn update_error(&self, task_id: &str, message: &str) -> CoreResult<()>;

    /// Runtime settings snapshot. Empty when nothing was ever stored.
    async fn get_app_settings(&self) -> CoreResult<HashMap<String, String>>;

    /// Merge `settings` into the stored snapshot.
    async fn set_app_settings(&self, settings: HashMap<String, String>) -> CoreResult<()>;

    /// Read a task as a typed record.
    async fn get_task(&self, task_id: &str) -> CoreResult<TaskRecord> {
        let fields = self.get_task_fields(task_id).await?;
        TaskRecord::from_fields(&fields)
    }

    /// Create a PENDING record and enqueue it.
    async fn create_task(&self, task_id: &str, original_file_path: &str) -> CoreResult<TaskRecord> {
        let record = TaskRecord::new_pending(task_id, original_file_path);
        self.set_task_fields(task_id, record.to_fields()).await?;

        let entry = QueueEntry {
            task_id: task_id.to_string(),
            original_file_path: original_file_path.to_string(),
        };
        self.push_task(&entry.to_json()?).await?;

        tracing::info!("Created task {} for {}", task_id, original_file_path);
        Ok(record)
    }
}

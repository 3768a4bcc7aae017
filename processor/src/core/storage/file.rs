//! File-backed task store.
//!
//! Layout under the store directory:
//! - `<queue_key>.json` (default `task_queue.json`): pending raw queue entries,
//!   oldest first
//! - `tasks/<task_id>.json`: flat field map of one task record
//! - `settings.json`: runtime settings snapshot
//! - `.store.lock`: advisory lock held for the duration of every operation
//!
//! The lock makes `pop_task` atomic across processes sharing the directory.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{apply_status, touch, TaskFields, TaskStatus, TaskStore, FIELD_ERROR_MESSAGE};
use crate::core::fs::{atomic_write_json_pretty, read_json_opt, validate_path_id_component};
use crate::core::{CoreError, CoreResult};

const DEFAULT_QUEUE_KEY: &str = "task_queue";
const SETTINGS_FILE: &str = "settings.json";
const TASKS_DIR: &str = "tasks";
const LOCK_FILE: &str = ".store.lock";

/// Task store persisted as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    root: PathBuf,
    queue_file: String,
}

impl FileTaskStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TASKS_DIR))?;
        Ok(Self {
            root,
            queue_file: format!("{DEFAULT_QUEUE_KEY}.json"),
        })
    }

    /// Keep the queue in `<queue_key>.json`. Stores sharing a directory only
    /// see each other's entries when they use the same key.
    pub fn with_queue_key(mut self, queue_key: &str) -> CoreResult<Self> {
        validate_path_id_component(queue_key, "queueKey")?;
        self.queue_file = format!("{queue_key}.json");
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, task_id: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(task_id, "taskId")?;
        Ok(self.root.join(TASKS_DIR).join(format!("{task_id}.json")))
    }

    /// Run `op` while holding the exclusive store lock.
    fn with_lock<T>(&self, op: impl FnOnce(&Self) -> CoreResult<T>) -> CoreResult<T> {
        std::fs::create_dir_all(&self.root)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;

        fs2::FileExt::lock_exclusive(&lock_file)
            .map_err(|e| CoreError::Storage(format!("Failed to lock task store: {}", e)))?;

        let result = op(self);

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            tracing::warn!("Failed to unlock task store: {}", e);
        }
        result
    }

    /// Run a locked operation on the blocking thread pool.
    async fn locked<T, F>(&self, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> CoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_lock(op))
            .await
            .map_err(|e| CoreError::Internal(format!("task store worker failed: {}", e)))?
    }

    fn read_queue(&self) -> CoreResult<VecDeque<String>> {
        Ok(read_json_opt(&self.root.join(&self.queue_file))?.unwrap_or_default())
    }

    fn write_queue(&self, queue: &VecDeque<String>) -> CoreResult<()> {
        atomic_write_json_pretty(&self.root.join(&self.queue_file), queue)
    }

    fn read_task(&self, task_id: &str) -> CoreResult<TaskFields> {
        read_json_opt(&self.task_path(task_id)?)?
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
    }

    fn write_task(&self, task_id: &str, fields: &TaskFields) -> CoreResult<()> {
        atomic_write_json_pretty(&self.task_path(task_id)?, fields)
    }

    fn read_settings(&self) -> CoreResult<HashMap<String, String>> {
        Ok(read_json_opt(&self.root.join(SETTINGS_FILE))?.unwrap_or_default())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn pop_task(&self) -> CoreResult<Option<String>> {
        self.locked(|store| {
            let mut queue = store.read_queue()?;
            let popped = queue.pop_front();
            if popped.is_some() {
                store.write_queue(&queue)?;
            }
            Ok(popped)
        })
        .await
    }

    async fn push_task(&self, raw: &str) -> CoreResult<()> {
        let raw = raw.to_string();
        self.locked(move |store| {
            let mut queue = store.read_queue()?;
            queue.push_back(raw);
            store.write_queue(&queue)
        })
        .await
    }

    async fn get_task_fields(&self, task_id: &str) -> CoreResult<TaskFields> {
        let task_id = task_id.to_string();
        self.locked(move |store| store.read_task(&task_id)).await
    }

    async fn set_task_fields(&self, task_id: &str, fields: TaskFields) -> CoreResult<()> {
        let task_id = task_id.to_string();
        self.locked(move |store| {
            let mut record = match store.read_task(&task_id) {
                Ok(existing) => existing,
                Err(CoreError::TaskNotFound(_)) => TaskFields::new(),
                Err(e) => return Err(e),
            };
            record.extend(fields);
            touch(&mut record);
            store.write_task(&task_id, &record)
        })
        .await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> CoreResult<()> {
        let task_id = task_id.to_string();
        self.locked(move |store| {
            let mut record = store.read_task(&task_id)?;
            apply_status(&task_id, &mut record, status)?;
            store.write_task(&task_id, &record)?;
            tracing::info!("Updated task {} status to {}", task_id, status);
            Ok(())
        })
        .await
    }

    async fn update_error(&self, task_id: &str, message: &str) -> CoreResult<()> {
        let task_id = task_id.to_string();
        let message = message.to_string();
        self.locked(move |store| {
            let mut record = store.read_task(&task_id)?;
            record.insert(FIELD_ERROR_MESSAGE.to_string(), message);
            touch(&mut record);
            store.write_task(&task_id, &record)
        })
        .await
    }

    async fn get_app_settings(&self) -> CoreResult<HashMap<String, String>> {
        self.locked(|store| store.read_settings()).await
    }

    async fn set_app_settings(&self, settings: HashMap<String, String>) -> CoreResult<()> {
        self.locked(move |store| {
            let mut current = store.read_settings()?;
            current.extend(settings);
            atomic_write_json_pretty(&store.root.join(SETTINGS_FILE), &current)
        })
        .await
    }
}

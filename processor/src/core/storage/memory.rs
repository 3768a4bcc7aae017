//! In-process task store.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{apply_status, touch, TaskFields, TaskStatus, TaskStore, FIELD_ERROR_MESSAGE};
use crate::core::{CoreError, CoreResult};

#[derive(Default)]
struct MemoryState {
    queue: VecDeque<String>,
    tasks: HashMap<String, TaskFields>,
    settings: HashMap<String, String>,
}

/// Task store held entirely in memory behind one async mutex.
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries still waiting in the queue.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn pop_task(&self) -> CoreResult<Option<String>> {
        Ok(self.state.lock().await.queue.pop_front())
    }

    async fn push_task(&self, raw: &str) -> CoreResult<()> {
        self.state.lock().await.queue.push_back(raw.to_string());
        Ok(())
    }

    async fn get_task_fields(&self, task_id: &str) -> CoreResult<TaskFields> {
        self.state
            .lock()
            .await
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
    }

    async fn set_task_fields(&self, task_id: &str, fields: TaskFields) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let record = state.tasks.entry(task_id.to_string()).or_default();
        record.extend(fields);
        touch(record);
        Ok(())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        apply_status(task_id, record, status)?;
        tracing::info!("Updated task {} status to {}", task_id, status);
        Ok(())
    }

    async fn update_error(&self, task_id: &str, message: &str) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        record.insert(FIELD_ERROR_MESSAGE.to_string(), message.to_string());
        touch(record);
        Ok(())
    }

    async fn get_app_settings(&self) -> CoreResult<HashMap<String, String>> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn set_app_settings(&self, settings: HashMap<String, String>) -> CoreResult<()> {
        self.state.lock().await.settings.extend(settings);
        Ok(())
    }
}

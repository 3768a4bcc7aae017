//! Deterministic per-task file locations.

use std::path::{Path, PathBuf};

use crate::core::fs::validate_path_id_component;
use crate::core::CoreResult;

/// Name of the uploaded source video inside a task directory.
pub const ORIGINAL_VIDEO_FILE: &str = "original.mp4";
/// Name of the translated result inside a task directory.
pub const OUTPUT_VIDEO_FILE: &str = "output.mp4";
const INTERMEDIATE_DIR: &str = "intermediate";

/// Derives task directories under one storage root:
/// `<base>/<task_id>/{original.mp4, output.mp4, intermediate/}`.
#[derive(Debug, Clone)]
pub struct PathManager {
    base: PathBuf,
}

impl PathManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn task_dir(&self, task_id: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(task_id, "taskId")?;
        Ok(self.base.join(task_id))
    }

    pub fn original_path(&self, task_id: &str) -> CoreResult<PathBuf> {
        Ok(self.task_dir(task_id)?.join(ORIGINAL_VIDEO_FILE))
    }

    pub fn output_path(&self, task_id: &str) -> CoreResult<PathBuf> {
        Ok(self.task_dir(task_id)?.join(OUTPUT_VIDEO_FILE))
    }

    pub fn intermediate_dir(&self, task_id: &str) -> CoreResult<PathBuf> {
        Ok(self.task_dir(task_id)?.join(INTERMEDIATE_DIR))
    }

    pub fn intermediate_path(&self, task_id: &str, file_name: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(file_name, "fileName")?;
        Ok(self.intermediate_dir(task_id)?.join(file_name))
    }

    /// Create the intermediate directory for a task.
    pub fn ensure_intermediate_dir(&self, task_id: &str) -> CoreResult<PathBuf> {
        let dir = self.intermediate_dir(task_id)?;
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Created intermediate directory: {}", dir.display());
        Ok(dir)
    }

    /// Remove every intermediate file of a task.
    pub fn cleanup_intermediate(&self, task_id: &str) -> CoreResult<()> {
        let dir = self.intermediate_dir(task_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!("Cleaned up intermediate files: {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

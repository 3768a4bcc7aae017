//! Processor Configuration
//!
//! Static service configuration loaded once at startup from a JSON file, plus
//! the typed per-job runtime settings view in [`runtime`].
//!
//! Every field has a default, so a partial (or missing) file is valid.

mod runtime;

pub use runtime::*;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::ffmpeg::AudioFormat;
use crate::core::{CoreError, CoreResult};

/// Lowest accepted pull interval
pub const MIN_PULL_INTERVAL_SECS: u64 = 1;

/// Which [`crate::core::storage::TaskStore`] backend the service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
}

/// Remote AI adaptor endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteEndpoint {
    /// Base URL, e.g. `http://127.0.0.1:8081`
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Initial backoff between retries, doubled on each attempt
    pub retry_backoff_ms: u64,
}

impl Default for RemoteEndpoint {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Root of the per-task directories
    pub storage_path: PathBuf,
    /// Directory of the file task store; defaults to `<storage_path>/.store`
    pub store_path: Option<PathBuf>,
    pub store: StoreKind,
    /// Name of the work queue; the file store keeps it in `<queue_key>.json`
    pub queue_key: String,
    /// Seconds between pull attempts
    pub pull_interval_secs: u64,
    /// Maximum number of jobs in flight
    pub max_concurrency: usize,
    /// Explicit ffmpeg binary; detected from the system when absent
    pub ffmpeg_path: Option<PathBuf>,
    pub ai_adaptor: RemoteEndpoint,
    /// Audio separation service; separation is unavailable when absent
    pub audio_separator: Option<RemoteEndpoint>,
    /// Canonical format of composed intermediates
    pub audio: AudioFormat,
    /// Rolling log file directory; stdout only when absent
    pub log_dir: Option<PathBuf>,
    /// Remove `intermediate/` after a job completes
    pub cleanup_intermediate: bool,
    /// Segments processed at once inside one job's remote loops (1 = sequential)
    pub segment_concurrency: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            store_path: None,
            store: StoreKind::default(),
            queue_key: "task_queue".to_string(),
            pull_interval_secs: 5,
            max_concurrency: num_cpus::get().max(1),
            ffmpeg_path: None,
            ai_adaptor: RemoteEndpoint::default(),
            audio_separator: None,
            audio: AudioFormat::default(),
            log_dir: None,
            cleanup_intermediate: true,
            segment_concurrency: 1,
        }
    }
}

impl ProcessorConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<ProcessorConfig>(&content).map_err(|e| {
                CoreError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                ProcessorConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.normalize();
        Ok(config)
    }

    /// Clamp out-of-range values to usable ones.
    pub fn normalize(&mut self) {
        if self.max_concurrency == 0 {
            tracing::warn!("max_concurrency must be at least 1, using 1");
            self.max_concurrency = 1;
        }
        if self.pull_interval_secs < MIN_PULL_INTERVAL_SECS {
            self.pull_interval_secs = MIN_PULL_INTERVAL_SECS;
        }
        self.segment_concurrency = self.segment_concurrency.max(1);
        if self.queue_key.trim().is_empty() {
            self.queue_key = "task_queue".to_string();
        }
        self.ai_adaptor.base_url = self.ai_adaptor.base_url.trim_end_matches('/').to_string();
        if let Some(sep) = self.audio_separator.as_mut() {
            sep.base_url = sep.base_url.trim_end_matches('/').to_string();
        }
        if self.audio.sample_rate == 0 {
            self.audio.sample_rate = AudioFormat::default().sample_rate;
        }
        if self.audio.channels == 0 {
            self.audio.channels = 1;
        }
    }

    /// Directory of the file task store.
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| self.storage_path.join(".store"))
    }
}

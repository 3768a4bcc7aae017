//! Dubflow Processor Library
//!
//! Video translation pipeline: pulls queued tasks, drives each one through
//! extraction, recognition, translation, voice cloning and timing correction,
//! and remuxes the translated audio onto the source video.

pub mod core;

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;

use crate::core::ffmpeg::{detect_ffmpeg, FFmpegRunner};
use crate::core::jobs::{SlotPool, TaskPullLoop};
use crate::core::pipeline::{Orchestrator, OrchestratorOptions};
use crate::core::remote::{HttpAiAdaptor, HttpAudioSeparator};
use crate::core::settings::{ProcessorConfig, StoreKind};
use crate::core::storage::{FileTaskStore, MemoryTaskStore, PathManager, TaskStore};
use crate::core::CoreResult;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber: stdout always, plus a daily rolling file
/// under `log_dir` when given. `RUST_LOG` refines the default `info` level.
pub fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "dubflow.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Already initialized in tests or embedded use.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Open the task store the configuration names.
pub fn open_store(config: &ProcessorConfig) -> CoreResult<Arc<dyn TaskStore>> {
    Ok(match config.store {
        StoreKind::Memory => Arc::new(MemoryTaskStore::new()),
        StoreKind::File => Arc::new(
            FileTaskStore::open(config.resolved_store_path())?.with_queue_key(&config.queue_key)?,
        ),
    })
}

/// Build the orchestrator and pull loop, then pull until `shutdown` is notified.
pub async fn run_service(config: ProcessorConfig, shutdown: Arc<Notify>) -> CoreResult<()> {
    let store = open_store(&config)?;

    let ffmpeg = detect_ffmpeg(config.ffmpeg_path.as_deref())?;
    tracing::info!(
        "Using ffmpeg {} at {}",
        ffmpeg.version,
        ffmpeg.ffmpeg_path.display()
    );
    let media = Arc::new(FFmpegRunner::new(ffmpeg, config.audio.clone()));

    let ai = Arc::new(HttpAiAdaptor::new(config.ai_adaptor.clone())?);
    let mut orchestrator = Orchestrator::new(
        Arc::clone(&store),
        media,
        ai,
        PathManager::new(config.storage_path.clone()),
    )
    .with_options(OrchestratorOptions::from(&config));

    match &config.audio_separator {
        Some(endpoint) => {
            orchestrator =
                orchestrator.with_separator(Arc::new(HttpAudioSeparator::new(endpoint.clone())?));
        }
        None => tracing::info!("No audio separator configured"),
    }

    let pull_loop = TaskPullLoop::new(
        store,
        Arc::new(orchestrator),
        SlotPool::new(config.max_concurrency),
        Duration::from_secs(config.pull_interval_secs),
    )
    .with_queue_key(config.queue_key.clone());

    pull_loop.run(shutdown).await;
    Ok(())
}

//! Dubflow CLI
//!
//! Submits videos to the processor's file-backed queue, inspects task status
//! and runtime settings, and exposes the audio timing tools directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use dubflow_lib::core::composer::AudioComposer;
use dubflow_lib::core::ffmpeg::{detect_ffmpeg, FFmpegRunner, MediaToolkit};
use dubflow_lib::core::settings::{ProcessorConfig, RuntimeSettings, KNOWN_KEYS};
use dubflow_lib::core::storage::{FileTaskStore, PathManager, TaskRecord, TaskStore};

#[derive(Parser)]
#[command(name = "dubflow", version, about = "Submit and inspect video translation tasks")]
struct Cli {
    /// Processor configuration file (storage location, ffmpeg path)
    #[arg(short = 'f', long = "config", global = true, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a video into storage and queue it for translation
    Submit { video: PathBuf },

    /// Show the record of a task
    Status { task_id: String },

    /// Show or change runtime settings
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Print the duration of a media file
    Probe { file: PathBuf },

    /// Fit a translated track to the duration of a reference track
    Align {
        translated: PathBuf,
        reference: PathBuf,
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Stored values and the effective typed view
    Show,
    /// Store one value
    Set { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("video not found: {0}")]
    VideoNotFound(PathBuf),

    #[error("unknown setting '{key}', expected one of: {known}")]
    UnknownSetting { key: String, known: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ProcessorConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let output = match cli.command {
        Commands::Submit { video } => serde_json::to_value(submit(&config, &video).await?)?,
        Commands::Status { task_id } => serde_json::to_value(status(&config, &task_id).await?)?,
        Commands::Settings(SettingsCommand::Show) => show_settings(&config).await?,
        Commands::Settings(SettingsCommand::Set { key, value }) => {
            set_setting(&config, key, value).await?
        }
        Commands::Probe { file } => {
            let duration = media(&config)?.probe_duration(&file).await?;
            json!({
                "path": file,
                "durationSecs": duration.as_secs_f64(),
            })
        }
        Commands::Align {
            translated,
            reference,
            output,
        } => {
            let composer = AudioComposer::new(media(&config)?);
            let decision = composer.align_track(&translated, &reference, &output).await?;
            json!({
                "output": output,
                "decision": format!("{decision:?}"),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open_store(config: &ProcessorConfig) -> Result<FileTaskStore> {
    let root = config.resolved_store_path();
    FileTaskStore::open(&root)
        .and_then(|store| store.with_queue_key(&config.queue_key))
        .with_context(|| format!("Failed to open store {}", root.display()))
}

fn media(config: &ProcessorConfig) -> Result<Arc<dyn MediaToolkit>> {
    let info = detect_ffmpeg(config.ffmpeg_path.as_deref()).context("FFmpeg not available")?;
    Ok(Arc::new(FFmpegRunner::new(info, config.audio.clone())))
}

/// Copy `video` to `<storage>/<task_id>/original.mp4` and queue a PENDING task.
async fn submit(config: &ProcessorConfig, video: &Path) -> Result<TaskRecord> {
    if !video.is_file() {
        return Err(CliError::VideoNotFound(video.to_path_buf()).into());
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    let paths = PathManager::new(config.storage_path.clone());
    let original = paths.original_path(&task_id)?;
    if let Some(parent) = original.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(video, &original)
        .await
        .with_context(|| format!("Failed to copy {} into storage", video.display()))?;

    let original_path = original.to_string_lossy().into_owned();
    let record = open_store(config)?.create_task(&task_id, &original_path).await?;
    Ok(record)
}

async fn status(config: &ProcessorConfig, task_id: &str) -> Result<TaskRecord> {
    Ok(open_store(config)?.get_task(task_id).await?)
}

async fn show_settings(config: &ProcessorConfig) -> Result<serde_json::Value> {
    let stored = open_store(config)?.get_app_settings().await?;
    Ok(settings_view(&stored))
}

fn settings_view(stored: &HashMap<String, String>) -> serde_json::Value {
    json!({
        "stored": stored,
        "effective": RuntimeSettings::from_snapshot(stored),
    })
}

async fn set_setting(config: &ProcessorConfig, key: String, value: String) -> Result<serde_json::Value> {
    if !KNOWN_KEYS.contains(&key.as_str()) {
        return Err(CliError::UnknownSetting {
            key,
            known: KNOWN_KEYS.join(", "),
        }
        .into());
    }

    let store = open_store(config)?;
    store
        .set_app_settings(HashMap::from([(key, value)]))
        .await?;
    let stored = store.get_app_settings().await?;
    Ok(settings_view(&stored))
}

//! Dubflow Error Definitions
//!
//! Defines error types used throughout the processor.

use thiserror::Error;

use super::ffmpeg::FFmpegError;
use super::remote::RemoteError;
use super::storage::TaskStatus;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Task Errors
    // =========================================================================
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidStatusTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Malformed queue entry: {0}")]
    MalformedEntry(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Media Errors
    // =========================================================================
    #[error("Media error: {0}")]
    Media(#[from] FFmpegError),

    #[error(
        "speed ratio {ratio:.3} out of range [{min:.2}, {max:.2}] (reference {reference_secs:.3}s, translated {translated_secs:.3}s)"
    )]
    SpeedRatioOutOfRange {
        ratio: f64,
        min: f64,
        max: f64,
        reference_secs: f64,
        translated_secs: f64,
    },

    #[error("Invalid ASR timing: {0}")]
    InvalidTiming(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    #[error("step {step} failed ({context}): {source}")]
    StepFailed {
        step: String,
        context: String,
        source: Box<CoreError>,
    },

    #[error("panic: {0}")]
    Panic(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

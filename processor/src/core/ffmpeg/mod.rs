//! FFmpeg Integration Module
//!
//! Media utilities for the translation pipeline:
//! - Audio extraction from the source video
//! - Segment cutting and duration probing
//! - Time-stretching, silence padding and silence generation
//! - List concatenation, track mixing and final remux
//!
//! Everything above this layer talks to [`MediaToolkit`], so the composer and
//! the orchestrator can run against a fake toolkit in tests.

mod detection;
mod runner;
pub mod speed;

pub use detection::*;
pub use runner::{parse_duration_output, FFmpegRunner};

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::TimeSec;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or set `ffmpeg_path` in the config.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

// =============================================================================
// Audio Format
// =============================================================================

/// PCM format every composed intermediate is encoded to.
///
/// Keeping all intermediates in one format is what allows the list concat to
/// run with `-c copy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Codec name passed to `-acodec`
    pub codec: String,
    /// Gain applied while extracting the source track, in dB
    pub extract_gain_db: f64,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            codec: "pcm_s16le".to_string(),
            extract_gain_db: 5.0,
        }
    }
}

impl AudioFormat {
    /// Output encoding arguments (`-acodec`, `-ar`, `-ac`).
    pub fn encode_args(&self) -> Vec<String> {
        vec![
            "-acodec".to_string(),
            self.codec.clone(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
        ]
    }

    /// Channel layout name used by `anullsrc`.
    pub fn channel_layout(&self) -> &'static str {
        if self.channels >= 2 {
            "stereo"
        } else {
            "mono"
        }
    }
}

// =============================================================================
// Media Toolkit
// =============================================================================

/// Media operations the pipeline needs from the external transcoding tool.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Extract a mono, gain-boosted PCM track from a video.
    async fn extract_audio(&self, video: &Path, output: &Path) -> FFmpegResult<()>;

    /// Cut `[start, end)` seconds out of `source`.
    async fn cut_segment(
        &self,
        source: &Path,
        output: &Path,
        start: TimeSec,
        end: TimeSec,
    ) -> FFmpegResult<()>;

    /// Measure the duration of a media file.
    async fn probe_duration(&self, input: &Path) -> FFmpegResult<Duration>;

    /// Change playback speed by `ratio` without altering pitch.
    ///
    /// A ratio above 1.0 speeds up (shorter output).
    async fn time_stretch(&self, input: &Path, ratio: f64, output: &Path) -> FFmpegResult<()>;

    /// Append `pad` of trailing silence.
    async fn pad_silence(&self, input: &Path, pad: Duration, output: &Path) -> FFmpegResult<()>;

    /// Write a silent file of exactly `duration`.
    async fn generate_silence(&self, duration: Duration, output: &Path) -> FFmpegResult<()>;

    /// Re-encode `input` into the canonical audio format.
    async fn transcode(&self, input: &Path, output: &Path) -> FFmpegResult<()>;

    /// Concatenate `inputs` in order through a concat list, without re-encoding.
    async fn concat_list(&self, inputs: &[PathBuf], output: &Path) -> FFmpegResult<()>;

    /// Mix vocals with background; the vocal track decides the output length.
    async fn mix_tracks(&self, vocals: &Path, background: &Path, output: &Path)
        -> FFmpegResult<()>;

    /// Replace the audio stream of `video` with `audio`, copying the video stream.
    async fn remux(&self, video: &Path, audio: &Path, output: &Path) -> FFmpegResult<()>;

    /// Copy all streams of `input` into `output` without re-encoding.
    async fn stream_copy(&self, input: &Path, output: &Path) -> FFmpegResult<()>;
}

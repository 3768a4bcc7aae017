//! FFmpeg Runner Module
//!
//! Executes ffmpeg/ffprobe subprocesses for the [`MediaToolkit`] operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::speed::atempo_filter;
use super::{AudioFormat, FFmpegError, FFmpegInfo, FFmpegResult, MediaToolkit};
use crate::core::TimeSec;

/// FFmpeg Runner for executing media processing commands
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
    format: AudioFormat,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from a detected FFmpeg installation
    pub fn new(info: FFmpegInfo, format: AudioFormat) -> Self {
        Self {
            info: Arc::new(info),
            format,
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Canonical output format
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn ensure_input(input: &Path) -> FFmpegResult<()> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }
        Ok(())
    }

    fn ensure_output_dir(output: &Path) -> FFmpegResult<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FFmpegError::OutputError(format!("Failed to create output directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Run ffmpeg with `-y` prepended and fail with stderr on non-zero exit.
    async fn run_ffmpeg(&self, args: Vec<String>, action: &str) -> FFmpegResult<()> {
        tracing::debug!("ffmpeg {}: {}", action, args.join(" "));

        let output = tokio::process::Command::new(&self.info.ffmpeg_path)
            .arg("-y")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(&args)
            .output()
            .await
            .map_err(FFmpegError::ProcessError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ExecutionFailed(format!(
                "{} failed: {}",
                action,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn secs_arg(secs: f64) -> String {
    format!("{:.3}", secs)
}

#[async_trait]
impl MediaToolkit for FFmpegRunner {
    async fn extract_audio(&self, video: &Path, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(video)?;
        Self::ensure_output_dir(output)?;

        let mut args = vec!["-i".to_string(), path_arg(video), "-vn".to_string()];
        args.extend(self.format.encode_args());
        args.extend([
            "-af".to_string(),
            format!("volume={}dB", self.format.extract_gain_db),
            path_arg(output),
        ]);

        self.run_ffmpeg(args, "Audio extraction").await?;
        tracing::info!("Extracted audio from {} to {}", video.display(), output.display());
        Ok(())
    }

    async fn cut_segment(
        &self,
        source: &Path,
        output: &Path,
        start: TimeSec,
        end: TimeSec,
    ) -> FFmpegResult<()> {
        Self::ensure_input(source)?;
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || end <= start {
            return Err(FFmpegError::InvalidInput(format!(
                "Invalid cut range: {:.3}s - {:.3}s",
                start, end
            )));
        }
        Self::ensure_output_dir(output)?;

        let mut args = vec![
            "-i".to_string(),
            path_arg(source),
            "-ss".to_string(),
            secs_arg(start),
            "-to".to_string(),
            secs_arg(end),
        ];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Segment cut").await
    }

    async fn probe_duration(&self, input: &Path) -> FFmpegResult<Duration> {
        Self::ensure_input(input)?;

        let output = tokio::process::Command::new(&self.info.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                &input.to_string_lossy(),
            ])
            .output()
            .await
            .map_err(FFmpegError::ProcessError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!("FFprobe failed: {}", stderr)));
        }

        parse_duration_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn time_stretch(&self, input: &Path, ratio: f64, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(input)?;
        let filter = atempo_filter(ratio)?;
        Self::ensure_output_dir(output)?;

        let mut args = vec![
            "-i".to_string(),
            path_arg(input),
            "-filter:a".to_string(),
            filter,
        ];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Time stretch").await?;
        tracing::debug!("Stretched {} by {:.3}x", input.display(), ratio);
        Ok(())
    }

    async fn pad_silence(&self, input: &Path, pad: Duration, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(input)?;
        Self::ensure_output_dir(output)?;

        let mut args = vec![
            "-i".to_string(),
            path_arg(input),
            "-af".to_string(),
            format!("apad=pad_dur={:.6}", pad.as_secs_f64()),
        ];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Silence padding").await
    }

    async fn generate_silence(&self, duration: Duration, output: &Path) -> FFmpegResult<()> {
        if duration.is_zero() {
            return Err(FFmpegError::InvalidInput(
                "Silence duration must be positive".to_string(),
            ));
        }
        Self::ensure_output_dir(output)?;

        let mut args = vec![
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "anullsrc=channel_layout={}:sample_rate={}",
                self.format.channel_layout(),
                self.format.sample_rate
            ),
            "-t".to_string(),
            format!("{:.6}", duration.as_secs_f64()),
        ];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Silence generation").await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(input)?;
        Self::ensure_output_dir(output)?;

        let mut args = vec!["-i".to_string(), path_arg(input)];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Transcode").await
    }

    async fn concat_list(&self, inputs: &[PathBuf], output: &Path) -> FFmpegResult<()> {
        if inputs.is_empty() {
            return Err(FFmpegError::InvalidInput(
                "No inputs to concatenate".to_string(),
            ));
        }
        for input in inputs {
            Self::ensure_input(input)?;
        }
        Self::ensure_output_dir(output)?;

        let list_path = PathBuf::from(format!("{}.concat.txt", output.display()));
        std::fs::write(&list_path, build_concat_list(inputs)?)
            .map_err(|e| FFmpegError::OutputError(format!("Failed to write concat list: {}", e)))?;

        let args = vec![
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            path_arg(&list_path),
            "-c".to_string(),
            "copy".to_string(),
            path_arg(output),
        ];
        let result = self.run_ffmpeg(args, "Concatenation").await;

        if let Err(e) = std::fs::remove_file(&list_path) {
            tracing::warn!("Failed to remove concat list {}: {}", list_path.display(), e);
        }
        result
    }

    async fn mix_tracks(
        &self,
        vocals: &Path,
        background: &Path,
        output: &Path,
    ) -> FFmpegResult<()> {
        Self::ensure_input(vocals)?;
        Self::ensure_input(background)?;
        Self::ensure_output_dir(output)?;

        let mut args = vec![
            "-i".to_string(),
            path_arg(vocals),
            "-i".to_string(),
            path_arg(background),
            "-filter_complex".to_string(),
            "amix=inputs=2:duration=first:dropout_transition=2".to_string(),
        ];
        args.extend(self.format.encode_args());
        args.push(path_arg(output));

        self.run_ffmpeg(args, "Track mix").await
    }

    async fn remux(&self, video: &Path, audio: &Path, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(video)?;
        Self::ensure_input(audio)?;
        Self::ensure_output_dir(output)?;

        self.run_ffmpeg(remux_args(video, audio, output), "Remux").await?;
        tracing::info!("Remuxed {} with new audio into {}", video.display(), output.display());
        Ok(())
    }

    async fn stream_copy(&self, input: &Path, output: &Path) -> FFmpegResult<()> {
        Self::ensure_input(input)?;
        Self::ensure_output_dir(output)?;

        let args = vec![
            "-i".to_string(),
            path_arg(input),
            "-c".to_string(),
            "copy".to_string(),
            path_arg(output),
        ];
        self.run_ffmpeg(args, "Stream copy").await
    }
}

/// Build concat demuxer list contents with absolute, quote-escaped paths.
fn build_concat_list(inputs: &[PathBuf]) -> FFmpegResult<String> {
    let mut list = String::new();
    for input in inputs {
        let abs = if input.is_absolute() {
            input.clone()
        } else {
            std::env::current_dir()
                .map_err(FFmpegError::ProcessError)?
                .join(input)
        };
        let escaped = abs.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    Ok(list)
}

/// Parse the duration out of `ffprobe -show_format` JSON output.
pub fn parse_duration_output(json_str: &str) -> FFmpegResult<Duration> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Invalid JSON: {}", e)))?;

    let secs = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| match d {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .ok_or_else(|| FFmpegError::ParseError("Missing format.duration".to_string()))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(FFmpegError::ParseError(format!(
            "Invalid duration value: {}",
            secs
        )));
    }

    Ok(Duration::from_secs_f64(secs))
}

/// Video stream copied as is, audio replaced. The video keeps its full length
/// even when the dubbed track ends early.
fn remux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(audio),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        path_arg(output),
    ]
}

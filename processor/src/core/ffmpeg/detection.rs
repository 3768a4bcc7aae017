//! FFmpeg Detection Module
//!
//! Resolves the ffmpeg/ffprobe binaries from an explicit configured path or
//! from the system installation.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};

/// Information about the detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
    /// Whether the paths came from configuration rather than discovery
    pub is_configured: bool,
}

#[cfg(target_os = "windows")]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(target_os = "windows"))]
const FFMPEG_BINARY: &str = "ffmpeg";

#[cfg(target_os = "windows")]
const FFPROBE_BINARY: &str = "ffprobe.exe";
#[cfg(not(target_os = "windows"))]
const FFPROBE_BINARY: &str = "ffprobe";

/// Detect FFmpeg, preferring an explicitly configured ffmpeg binary.
///
/// ffprobe is expected next to a configured ffmpeg; if it is not there the
/// system ffprobe is used.
pub fn detect_ffmpeg(configured: Option<&Path>) -> FFmpegResult<FFmpegInfo> {
    match configured {
        Some(path) => detect_configured_ffmpeg(path),
        None => detect_system_ffmpeg(),
    }
}

/// Use the ffmpeg binary at `ffmpeg_path`.
pub fn detect_configured_ffmpeg(ffmpeg_path: &Path) -> FFmpegResult<FFmpegInfo> {
    if !ffmpeg_path.exists() {
        tracing::warn!("Configured ffmpeg path does not exist: {}", ffmpeg_path.display());
        return Err(FFmpegError::NotFound);
    }

    let sibling = ffmpeg_path
        .parent()
        .map(|dir| dir.join(FFPROBE_BINARY))
        .filter(|p| p.exists());
    let ffprobe_path = match sibling {
        Some(p) => p,
        None => which_binary(FFPROBE_BINARY)?,
    };

    let version = get_ffmpeg_version(ffmpeg_path)?;

    Ok(FFmpegInfo {
        ffmpeg_path: ffmpeg_path.to_path_buf(),
        ffprobe_path,
        version,
        is_configured: true,
    })
}

/// Detect FFmpeg from common install locations and the system PATH.
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = which_binary(FFMPEG_BINARY)?;
    let ffprobe_path = which_binary(FFPROBE_BINARY)?;

    let version = get_ffmpeg_version(&ffmpeg_path)?;

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
        is_configured: false,
    })
}

/// Find a binary in common locations, then through `which`/`where`.
fn which_binary(binary_name: &str) -> FFmpegResult<PathBuf> {
    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(binary_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    #[cfg(target_os = "windows")]
    let locator = "where";
    #[cfg(not(target_os = "windows"))]
    let locator = "which";

    let output = Command::new(locator)
        .arg(binary_name)
        .output()
        .map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = path_str.lines().next() {
            let trimmed = first_line.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
    }

    Err(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the version out of `ffmpeg -version` output.
fn parse_version_line(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))?;

    if let Some(version_part) = first_line.strip_prefix("ffmpeg version ") {
        if let Some(version) = version_part.split_whitespace().next() {
            return Ok(version.to_string());
        }
    }
    Ok(first_line.to_string())
}

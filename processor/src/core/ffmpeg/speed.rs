//! Speed ratio bounds and `atempo` chain construction.

use std::time::Duration;

use super::{FFmpegError, FFmpegResult};

/// Lowest ratio a single `atempo` stage accepts.
pub const ATEMPO_MIN: f64 = 0.5;
/// Highest ratio a single `atempo` stage accepts.
pub const ATEMPO_MAX: f64 = 2.0;

/// Accepted band for per-segment correction.
pub const SEGMENT_MIN_SPEED_RATIO: f64 = 0.8;
pub const SEGMENT_MAX_SPEED_RATIO: f64 = 1.2;

/// Accepted band for whole-track alignment.
pub const TRACK_MIN_SPEED_RATIO: f64 = 0.9;
pub const TRACK_MAX_SPEED_RATIO: f64 = 1.1;

/// Differences up to this are handled by padding or pass-through instead of stretching.
pub const ALIGN_THRESHOLD: Duration = Duration::from_millis(500);

/// Allowed deviation when verifying a stretched segment.
pub const VERIFY_TOLERANCE: Duration = Duration::from_millis(50);

/// Ratios this close to 1.0 are not worth stretching.
pub const NEAR_UNITY_EPSILON: f64 = 0.01;

/// Decompose `ratio` into `atempo` stages that each stay within [0.5, 2.0].
///
/// The product of the returned stages equals `ratio`.
pub fn atempo_chain(ratio: f64) -> FFmpegResult<Vec<f64>> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(FFmpegError::InvalidInput(format!(
            "speed ratio must be a positive finite number, got {ratio}"
        )));
    }

    let mut remaining = ratio;
    let mut stages = Vec::with_capacity(4);

    while remaining < ATEMPO_MIN {
        stages.push(ATEMPO_MIN);
        remaining /= ATEMPO_MIN;
    }
    while remaining > ATEMPO_MAX {
        stages.push(ATEMPO_MAX);
        remaining /= ATEMPO_MAX;
    }
    stages.push(remaining);

    Ok(stages)
}

/// Render an `atempo` chain as an ffmpeg audio filter expression.
pub fn atempo_filter(ratio: f64) -> FFmpegResult<String> {
    let stages = atempo_chain(ratio)?;
    Ok(stages
        .iter()
        .map(|s| format!("atempo={s:.6}"))
        .collect::<Vec<_>>()
        .join(","))
}

/// Whether `ratio` is close enough to 1.0 to skip stretching.
pub fn is_near_unity(ratio: f64) -> bool {
    (ratio - 1.0).abs() <= NEAR_UNITY_EPSILON + f64::EPSILON * 16.0
}

/// Check `actual` against `expected` with an absolute tolerance.
pub fn verify_duration(
    actual: Duration,
    expected: Duration,
    tolerance: Duration,
) -> FFmpegResult<Duration> {
    let deviation = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    if deviation > tolerance {
        return Err(FFmpegError::ExecutionFailed(format!(
            "duration mismatch: expected {:.3}s, got {:.3}s (deviation {:.3}s > tolerance {:.3}s)",
            expected.as_secs_f64(),
            actual.as_secs_f64(),
            deviation.as_secs_f64(),
            tolerance.as_secs_f64()
        )));
    }
    Ok(actual)
}

//! Duration alignment decisions and whole-track alignment.

use std::path::Path;
use std::time::Duration;

use super::AudioComposer;
use crate::core::ffmpeg::speed::{
    is_near_unity, ALIGN_THRESHOLD, SEGMENT_MAX_SPEED_RATIO, SEGMENT_MIN_SPEED_RATIO,
    TRACK_MAX_SPEED_RATIO, TRACK_MIN_SPEED_RATIO,
};
use crate::core::{CoreError, CoreResult};

/// What to do with a candidate track to make it fit a reference duration.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignDecision {
    /// Keep the candidate as it is
    PassThrough,
    /// Re-encode without changing speed; the ratio is too close to 1.0 to matter
    Normalize,
    /// Append exactly this much trailing silence
    Pad(Duration),
    /// Stretch so the output lasts `reference / candidate` times as long
    Stretch { ratio: f64 },
}

impl AlignDecision {
    /// Tempo factor for the stretch filter (above 1.0 plays faster).
    pub fn tempo(&self) -> Option<f64> {
        match self {
            AlignDecision::Stretch { ratio } => Some(1.0 / ratio),
            _ => None,
        }
    }
}

/// Bounds used when deciding an alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignPolicy {
    /// Differences up to this are padded instead of stretched
    pub threshold: Duration,
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl AlignPolicy {
    /// Whole-track alignment: [0.9, 1.1], 500 ms threshold.
    pub const TRACK: AlignPolicy = AlignPolicy {
        threshold: ALIGN_THRESHOLD,
        min_ratio: TRACK_MIN_SPEED_RATIO,
        max_ratio: TRACK_MAX_SPEED_RATIO,
    };

    /// Per-segment correction: [0.8, 1.2], 500 ms threshold.
    pub const SEGMENT: AlignPolicy = AlignPolicy {
        threshold: ALIGN_THRESHOLD,
        min_ratio: SEGMENT_MIN_SPEED_RATIO,
        max_ratio: SEGMENT_MAX_SPEED_RATIO,
    };

    fn check_ratio(&self, reference: Duration, candidate: Duration) -> CoreResult<f64> {
        if candidate.is_zero() {
            return Err(CoreError::ValidationError(
                "candidate audio has zero duration".to_string(),
            ));
        }
        let ratio = reference.as_secs_f64() / candidate.as_secs_f64();
        if ratio < self.min_ratio || ratio > self.max_ratio {
            return Err(CoreError::SpeedRatioOutOfRange {
                ratio,
                min: self.min_ratio,
                max: self.max_ratio,
                reference_secs: reference.as_secs_f64(),
                translated_secs: candidate.as_secs_f64(),
            });
        }
        Ok(ratio)
    }
}

/// Decide whole-track alignment of `translated` against `reference`.
///
/// Within the threshold a shorter track is padded and a longer one passes
/// through untouched; trimming is never done. Beyond the threshold the track
/// is stretched if the ratio is inside the policy band.
pub fn decide_track_alignment(
    reference: Duration,
    translated: Duration,
    policy: &AlignPolicy,
) -> CoreResult<AlignDecision> {
    if reference.abs_diff(translated) <= policy.threshold {
        if translated < reference {
            return Ok(AlignDecision::Pad(reference - translated));
        }
        return Ok(AlignDecision::PassThrough);
    }

    let ratio = policy.check_ratio(reference, translated)?;
    Ok(AlignDecision::Stretch { ratio })
}

/// Decide how a cloned segment is corrected to its original duration.
///
/// The ratio band is checked first. A clone that is short by no more than the
/// threshold gets exact silence padding, a near-unity ratio is only
/// re-encoded, and everything else is stretched.
pub fn decide_segment_alignment(
    original: Duration,
    cloned: Duration,
    policy: &AlignPolicy,
) -> CoreResult<AlignDecision> {
    let ratio = policy.check_ratio(original, cloned)?;

    if cloned < original && original - cloned <= policy.threshold {
        return Ok(AlignDecision::Pad(original - cloned));
    }
    if is_near_unity(ratio) {
        return Ok(AlignDecision::Normalize);
    }
    Ok(AlignDecision::Stretch { ratio })
}

impl AudioComposer {
    /// Apply a decision to `input`, writing `output`.
    pub async fn apply_alignment(
        &self,
        decision: &AlignDecision,
        input: &Path,
        output: &Path,
    ) -> CoreResult<()> {
        match decision {
            AlignDecision::PassThrough => self.media.stream_copy(input, output).await?,
            AlignDecision::Normalize => self.media.transcode(input, output).await?,
            AlignDecision::Pad(pad) if pad.is_zero() => {
                self.media.stream_copy(input, output).await?
            }
            AlignDecision::Pad(pad) => self.media.pad_silence(input, *pad, output).await?,
            AlignDecision::Stretch { ratio } => {
                self.media.time_stretch(input, 1.0 / ratio, output).await?
            }
        }
        Ok(())
    }

    /// Align a whole translated track to the duration of a reference track.
    ///
    /// Fails with [`CoreError::SpeedRatioOutOfRange`] without writing `output`
    /// when the required ratio is outside [0.9, 1.1].
    pub async fn align_track(
        &self,
        translated: &Path,
        reference: &Path,
        output: &Path,
    ) -> CoreResult<AlignDecision> {
        let translated_duration = self.media.probe_duration(translated).await?;
        let reference_duration = self.media.probe_duration(reference).await?;

        tracing::info!(
            "Aligning track: reference={:.3}s translated={:.3}s",
            reference_duration.as_secs_f64(),
            translated_duration.as_secs_f64()
        );

        let decision =
            decide_track_alignment(reference_duration, translated_duration, &AlignPolicy::TRACK)
                .inspect_err(|e| tracing::error!("Track alignment rejected: {}", e))?;

        self.apply_alignment(&decision, translated, output).await?;
        Ok(decision)
    }
}

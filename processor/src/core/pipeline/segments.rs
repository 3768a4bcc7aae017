//! Per-segment helpers: translation length targets, speaker roles and
//! voice reference selection.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::Segment;
use crate::core::{SpeakerId, TimeSec};

/// Speaking rate the translation length targets are derived from.
pub const TARGET_WORDS_PER_SECOND: f64 = 3.6;
/// Relative slack around the target length.
pub const TARGET_WORD_TOLERANCE: f64 = 0.15;
/// Amount of source speech joined into one speaker reference.
pub const SPEAKER_REFERENCE_TARGET_SECS: TimeSec = 12.0;
/// Role sent for segments without a speaker id.
pub const DEFAULT_SPEAKER_ROLE: &str = "default-speaker";

/// Word (character) count bounds for a translation spoken in `duration_secs`.
///
/// `min = max(floor(t * 0.85), 1)` and `max = max(ceil(t * 1.15), min + 1)`
/// with `t = duration * 3.6`. Non-positive durations give `(1, 1)`.
pub fn word_bounds(duration_secs: TimeSec) -> (u32, u32) {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return (1, 1);
    }
    let target = duration_secs * TARGET_WORDS_PER_SECOND;
    let min = (target * (1.0 - TARGET_WORD_TOLERANCE)).floor().max(1.0) as u32;
    let max = ((target * (1.0 + TARGET_WORD_TOLERANCE)).ceil() as u32).max(min + 1);
    (min, max)
}

pub fn speaker_role(speaker_id: &str) -> String {
    if speaker_id.trim().is_empty() {
        DEFAULT_SPEAKER_ROLE.to_string()
    } else {
        speaker_id.to_string()
    }
}

/// Length of a translation in characters.
pub fn text_length(text: &str) -> usize {
    text.chars().count()
}

/// Bounds the translation of `segment` violates, if any.
pub fn length_violation(segment: &Segment) -> Option<(u32, u32)> {
    let (min, max) = word_bounds(segment.duration_secs());
    let len = text_length(&segment.translated_text);
    if len < min as usize || len > max as usize {
        Some((min, max))
    } else {
        None
    }
}

/// Make a speaker id usable inside a file name.
pub fn file_component(speaker_id: &str) -> String {
    let cleaned: String = speaker_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Pick each speaker's cuts in timeline order until about 12 seconds are covered.
pub fn select_reference_cuts(segments: &[Segment]) -> BTreeMap<SpeakerId, Vec<PathBuf>> {
    let mut selected: BTreeMap<SpeakerId, (TimeSec, Vec<PathBuf>)> = BTreeMap::new();

    for segment in segments {
        let (total, cuts) = selected.entry(segment.speaker_id.clone()).or_default();
        if *total >= SPEAKER_REFERENCE_TARGET_SECS {
            continue;
        }
        cuts.push(segment.audio_segment_path.clone());
        *total += segment.duration_secs();
    }

    selected
        .into_iter()
        .map(|(speaker, (_, cuts))| (speaker, cuts))
        .collect()
}

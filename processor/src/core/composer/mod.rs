//! Audio Composer
//!
//! Sequences media operations into track-level alignment, timeline-preserving
//! concatenation and vocal/background merging.

mod align;
mod concat;
mod merge;

pub use align::*;
pub use concat::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::ffmpeg::MediaToolkit;
use crate::core::TimeSec;

// =============================================================================
// Composition Units
// =============================================================================

/// A synthesized or aligned audio file placed on the original timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Position on the original timeline
    pub start_time: Duration,
    /// Audio file for this position
    pub file_path: PathBuf,
}

impl AudioSegment {
    pub fn new(start_time: Duration, file_path: impl Into<PathBuf>) -> Self {
        Self {
            start_time,
            file_path: file_path.into(),
        }
    }
}

/// Original recognition timing of an utterance, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    pub start: TimeSec,
    pub end: TimeSec,
}

impl SegmentTiming {
    pub fn new(start: TimeSec, end: TimeSec) -> Self {
        Self { start, end }
    }

    pub fn duration_secs(&self) -> TimeSec {
        self.end - self.start
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Audio composer backed by a [`MediaToolkit`].
#[derive(Clone)]
pub struct AudioComposer {
    media: Arc<dyn MediaToolkit>,
}

impl AudioComposer {
    pub fn new(media: Arc<dyn MediaToolkit>) -> Self {
        Self { media }
    }

    pub fn media(&self) -> &Arc<dyn MediaToolkit> {
        &self.media
    }
}

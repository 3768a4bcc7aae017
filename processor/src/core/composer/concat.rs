//! Ordered concatenation, with and without the original timeline gaps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AudioComposer, AudioSegment, SegmentTiming};
use crate::core::{secs_to_duration, CoreError, CoreResult};

/// Gaps shorter than this are treated as back-to-back utterances.
const MIN_GAP: Duration = Duration::from_millis(1);

/// Overlaps up to this are rounding noise from recognition timestamps.
const OVERLAP_TOLERANCE_SECS: f64 = 0.001;

/// Sort segments by start time. The sort is stable, so equal starts keep input order.
pub fn sort_segments(segments: &mut [AudioSegment]) {
    segments.sort_by_key(|s| s.start_time);
}

/// One element of a timeline concat: a file and the silence that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineItem {
    pub file_path: PathBuf,
    pub gap_after: Duration,
}

/// Plan a timeline-preserving concat.
///
/// Returns the leading silence before the first utterance and one item per
/// segment with the gap to the next utterance. Timings are paired with
/// segments by index and the pairs are ordered by recognition start.
pub fn plan_timeline(
    segments: &[AudioSegment],
    timings: &[SegmentTiming],
) -> CoreResult<(Duration, Vec<TimelineItem>)> {
    if segments.is_empty() {
        return Err(CoreError::ValidationError(
            "no audio segments to concatenate".to_string(),
        ));
    }
    if segments.len() != timings.len() {
        return Err(CoreError::ValidationError(format!(
            "segment count mismatch: {} audio segments, {} timings",
            segments.len(),
            timings.len()
        )));
    }

    let mut pairs: Vec<(&AudioSegment, &SegmentTiming)> = segments.iter().zip(timings).collect();
    pairs.sort_by(|a, b| a.1.start.total_cmp(&b.1.start));

    let lead = secs_to_duration(pairs[0].1.start);
    let mut items = Vec::with_capacity(pairs.len());

    for (i, (segment, timing)) in pairs.iter().enumerate() {
        let gap_after = match pairs.get(i + 1) {
            Some((_, next)) => {
                let gap_secs = next.start - timing.end;
                if gap_secs < -OVERLAP_TOLERANCE_SECS {
                    return Err(CoreError::InvalidTiming(format!(
                        "segment {} ends at {:.3}s but segment {} starts at {:.3}s (overlap of {:.3}s)",
                        i,
                        timing.end,
                        i + 1,
                        next.start,
                        -gap_secs
                    )));
                }
                secs_to_duration(gap_secs)
            }
            None => Duration::ZERO,
        };

        items.push(TimelineItem {
            file_path: segment.file_path.clone(),
            gap_after: if gap_after < MIN_GAP {
                Duration::ZERO
            } else {
                gap_after
            },
        });
    }

    Ok((if lead < MIN_GAP { Duration::ZERO } else { lead }, items))
}

impl AudioComposer {
    /// Concatenate segments in start order.
    ///
    /// A single segment is stream-copied; several go through a concat list.
    pub async fn concatenate(&self, segments: &[AudioSegment], output: &Path) -> CoreResult<()> {
        if segments.is_empty() {
            return Err(CoreError::ValidationError(
                "no audio segments to concatenate".to_string(),
            ));
        }

        let mut ordered = segments.to_vec();
        sort_segments(&mut ordered);

        tracing::info!("Concatenating {} audio segments", ordered.len());

        if let [only] = ordered.as_slice() {
            self.media.stream_copy(&only.file_path, output).await?;
            return Ok(());
        }

        let inputs: Vec<PathBuf> = ordered.into_iter().map(|s| s.file_path).collect();
        self.media.concat_list(&inputs, output).await?;
        Ok(())
    }

    /// Concatenate aligned segments at their original timeline positions.
    ///
    /// Silence is generated for the offset before the first utterance and for
    /// every gap between utterances, so the output timeline matches the source.
    pub async fn concatenate_with_timing(
        &self,
        segments: &[AudioSegment],
        timings: &[SegmentTiming],
        output: &Path,
    ) -> CoreResult<()> {
        let (lead, items) = plan_timeline(segments, timings)?;

        tracing::info!(
            "Concatenating {} segments with original timing (lead {:.3}s)",
            items.len(),
            lead.as_secs_f64()
        );

        if lead.is_zero() && items.len() == 1 && items[0].gap_after.is_zero() {
            self.media.stream_copy(&items[0].file_path, output).await?;
            return Ok(());
        }

        let parts_dir = parts_dir_for(output);
        std::fs::create_dir_all(&parts_dir)?;

        let result = self.concat_items(lead, &items, &parts_dir, output).await;

        if let Err(e) = std::fs::remove_dir_all(&parts_dir) {
            tracing::warn!("Failed to remove {}: {}", parts_dir.display(), e);
        }
        result
    }

    async fn concat_items(
        &self,
        lead: Duration,
        items: &[TimelineItem],
        parts_dir: &Path,
        output: &Path,
    ) -> CoreResult<()> {
        let mut inputs = Vec::with_capacity(items.len() * 2 + 1);

        if !lead.is_zero() {
            let lead_path = parts_dir.join("silence_lead.wav");
            self.media.generate_silence(lead, &lead_path).await?;
            inputs.push(lead_path);
        }

        for (i, item) in items.iter().enumerate() {
            inputs.push(item.file_path.clone());
            if !item.gap_after.is_zero() {
                tracing::debug!("Segment {}: gap after = {:.3}s", i, item.gap_after.as_secs_f64());
                let silence_path = parts_dir.join(format!("silence_{}.wav", i));
                self.media.generate_silence(item.gap_after, &silence_path).await?;
                inputs.push(silence_path);
            }
        }

        self.media.concat_list(&inputs, output).await?;
        Ok(())
    }
}

fn parts_dir_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "concat".to_string());
    output.with_file_name(format!("{}_parts", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeMedia;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seg(start_ms: u64, path: &str) -> AudioSegment {
        AudioSegment::new(Duration::from_millis(start_ms), path)
    }

    #[test]
    fn test_sort_segments_orders_by_start_and_is_stable() {
        let mut segments = vec![seg(3000, "c"), seg(1000, "a"), seg(3000, "d"), seg(0, "z")];
        sort_segments(&mut segments);
        let names: Vec<_> = segments.iter().map(|s| s.file_path.clone()).collect();
        assert_eq!(names, vec![
            PathBuf::from("z"),
            PathBuf::from("a"),
            PathBuf::from("c"),
            PathBuf::from("d")
        ]);

        let once = segments.clone();
        sort_segments(&mut segments);
        assert_eq!(segments, once);
    }

    #[test]
    fn test_plan_timeline_gaps_and_lead() {
        let segments = vec![seg(1500, "b"), seg(500, "a")];
        let timings = vec![SegmentTiming::new(4.0, 5.0), SegmentTiming::new(0.5, 2.0)];
        let (lead, items) = plan_timeline(&segments, &timings).unwrap();

        assert_eq!(lead, Duration::from_millis(500));
        assert_eq!(items[0].file_path, PathBuf::from("a"));
        assert_eq!(items[0].gap_after, Duration::from_secs(2));
        assert_eq!(items[1].file_path, PathBuf::from("b"));
        assert_eq!(items[1].gap_after, Duration::ZERO);
    }

    #[test]
    fn test_plan_timeline_overlap_is_invalid_timing() {
        let segments = vec![seg(0, "a"), seg(900, "b")];
        let timings = vec![SegmentTiming::new(0.0, 1.2), SegmentTiming::new(0.9, 2.0)];
        let err = plan_timeline(&segments, &timings).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTiming(_)));
        assert!(err.to_string().contains("overlap of 0.300s"));
    }

    #[test]
    fn test_plan_timeline_rejects_empty_and_mismatch() {
        assert!(plan_timeline(&[], &[]).is_err());
        assert!(plan_timeline(&[seg(0, "a")], &[]).is_err());
    }

    #[tokio::test]
    async fn test_concatenate_single_segment_is_stream_copied() {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::new());
        let a = media.add_file(dir.path().join("a.wav"), Duration::from_secs(2));
        let out = dir.path().join("out.wav");

        let composer = AudioComposer::new(media.clone());
        composer
            .concatenate(&[AudioSegment::new(Duration::ZERO, &a)], &out)
            .await
            .unwrap();

        assert_eq!(media.calls_named("stream_copy"), 1);
        assert_eq!(media.calls_named("concat_list"), 0);
        assert_eq!(media.duration_of(&out), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_concatenate_orders_inputs_by_start() {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::new());
        let a = media.add_file(dir.path().join("a.wav"), Duration::from_secs(1));
        let b = media.add_file(dir.path().join("b.wav"), Duration::from_secs(2));
        let out = dir.path().join("out.wav");

        let composer = AudioComposer::new(media.clone());
        composer
            .concatenate(
                &[
                    AudioSegment::new(Duration::from_secs(5), &b),
                    AudioSegment::new(Duration::from_secs(1), &a),
                ],
                &out,
            )
            .await
            .unwrap();

        assert_eq!(media.last_concat_inputs(), vec![a, b]);
        assert_eq!(media.duration_of(&out), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_concatenate_with_timing_preserves_gap() {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::new());
        let a = media.add_file(dir.path().join("a.wav"), Duration::from_secs(1));
        let b = media.add_file(dir.path().join("b.wav"), Duration::from_secs(1));
        let out = dir.path().join("concatenated.wav");

        let composer = AudioComposer::new(media.clone());
        composer
            .concatenate_with_timing(
                &[
                    AudioSegment::new(Duration::ZERO, &a),
                    AudioSegment::new(Duration::from_secs(3), &b),
                ],
                &[SegmentTiming::new(0.0, 1.0), SegmentTiming::new(3.0, 4.0)],
                &out,
            )
            .await
            .unwrap();

        let inputs = media.last_concat_inputs();
        assert_eq!(inputs.len(), 3);
        assert_eq!(media.recorded_duration(&inputs[1]), Some(Duration::from_secs(2)));
        assert_eq!(media.duration_of(&out), Some(Duration::from_secs(4)));
        assert!(!dir.path().join("concatenated_parts").exists());
    }
}

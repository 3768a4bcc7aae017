//! The ordered stages of one translation job.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};

use super::segments::{
    file_component, length_violation, select_reference_cuts, speaker_role, word_bounds,
};
use super::{Orchestrator, Segment};
use crate::core::composer::{
    decide_segment_alignment, AlignDecision, AlignPolicy, AudioSegment, SegmentTiming,
};
use crate::core::ffmpeg::speed::{verify_duration, VERIFY_TOLERANCE};
use crate::core::remote::{
    CloneVoiceRequest, OptimizeRequest, PolishRequest, RecognizedSpeaker, RemoteError,
    TranslateRequest,
};
use crate::core::settings::{RuntimeSettings, VoiceReferenceMode};
use crate::core::storage::{QueueEntry, TaskFields, FIELD_RESULT_FILE_PATH};
use crate::core::{secs_to_duration, CoreError, CoreResult, SpeakerId};

const SOURCE_AUDIO_FILE: &str = "original_audio.wav";
const SEPARATED_DIR: &str = "separated";
const CONCATENATED_FILE: &str = "concatenated.wav";
const MERGED_FILE: &str = "merged_audio.wav";

/// Wrap a stage error with its step number and a short description.
fn step_failed<E: Into<CoreError>>(
    step: u8,
    context: impl Into<String>,
) -> impl FnOnce(E) -> CoreError {
    let context = context.into();
    move |e| CoreError::StepFailed {
        step: step.to_string(),
        context,
        source: Box::new(e.into()),
    }
}

impl Orchestrator {
    /// Steps 2 to 16. Status bookkeeping around them is done by `run_job`.
    pub(super) async fn execute(&self, entry: &QueueEntry) -> CoreResult<PathBuf> {
        let task_id = entry.task_id.as_str();
        let settings = self.load_settings(task_id).await;

        let work_dir = self
            .paths
            .ensure_intermediate_dir(task_id)
            .map_err(step_failed(3, "create intermediate directory"))?;

        let video = PathBuf::from(&entry.original_file_path);
        let source_audio = work_dir.join(SOURCE_AUDIO_FILE);
        self.media
            .extract_audio(&video, &source_audio)
            .await
            .map_err(step_failed(4, "extract audio"))?;

        let (vocals, background) = self
            .separate(task_id, &settings, &source_audio, &work_dir)
            .await
            .map_err(step_failed(5, "separate vocals"))?;

        let speakers = self
            .ai
            .recognize(&vocals)
            .await
            .map_err(step_failed(6, "recognize speech"))?;
        let mut segments = collect_segments(task_id, speakers, &work_dir);
        if segments.is_empty() {
            return Err(step_failed(6, "recognize speech")(CoreError::ValidationError(
                "no speech recognized".to_string(),
            )));
        }
        tracing::info!("Task {}: recognized {} segments", task_id, segments.len());

        self.cut_segments(&vocals, &segments).await?;
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));

        if settings.polishing_enabled {
            self.polish(&settings, &mut segments).await?;
        }
        self.translate(&settings, &mut segments).await?;
        if settings.optimization_enabled {
            self.optimize(&settings, &mut segments).await?;
        }
        if settings.length_enforcement_enabled {
            self.enforce_length(task_id, &settings, &mut segments).await;
        }

        let cloned = self.clone_voices(&settings, &segments, &work_dir).await?;
        let aligned = self.correct_segments(task_id, &segments, &cloned, &work_dir).await?;

        let timings: Vec<SegmentTiming> = segments.iter().map(Segment::timing).collect();
        let concatenated = work_dir.join(CONCATENATED_FILE);
        self.composer
            .concatenate_with_timing(&aligned, &timings, &concatenated)
            .await
            .map_err(step_failed(13, "concatenate segments"))?;

        let merged = work_dir.join(MERGED_FILE);
        self.composer
            .merge(&concatenated, background.as_deref(), &merged)
            .await
            .map_err(step_failed(14, "merge background"))?;

        let output = self
            .paths
            .output_path(task_id)
            .map_err(step_failed(15, "remux video"))?;
        self.media
            .remux(&video, &merged, &output)
            .await
            .map_err(step_failed(15, "remux video"))?;

        let mut fields = TaskFields::new();
        fields.insert(
            FIELD_RESULT_FILE_PATH.to_string(),
            output.to_string_lossy().into_owned(),
        );
        self.store
            .set_task_fields(task_id, fields)
            .await
            .map_err(step_failed(16, "save result path"))?;

        Ok(output)
    }

    async fn load_settings(&self, task_id: &str) -> RuntimeSettings {
        match self.store.get_app_settings().await {
            Ok(snapshot) => RuntimeSettings::from_snapshot(&snapshot),
            Err(e) => {
                tracing::warn!(
                    "Task {}: failed to load runtime settings, using defaults: {}",
                    task_id,
                    e
                );
                RuntimeSettings::default()
            }
        }
    }

    /// Vocals and optional background. Falls back to the full mix when
    /// separation is off or the service cannot be reached.
    async fn separate(
        &self,
        task_id: &str,
        settings: &RuntimeSettings,
        audio: &Path,
        work_dir: &Path,
    ) -> CoreResult<(PathBuf, Option<PathBuf>)> {
        let unseparated = (audio.to_path_buf(), None);
        if !settings.audio_separation_enabled {
            return Ok(unseparated);
        }
        let Some(separator) = &self.separator else {
            tracing::warn!(
                "Task {}: audio separation enabled but no separator is configured, using the full mix",
                task_id
            );
            return Ok(unseparated);
        };
        if let Err(e) = separator.health_check().await {
            tracing::warn!(
                "Task {}: audio separator unavailable ({}), using the full mix",
                task_id,
                e
            );
            return Ok(unseparated);
        }

        let output_dir = work_dir.join(SEPARATED_DIR);
        std::fs::create_dir_all(&output_dir)?;

        match separator.separate(audio, &output_dir).await {
            Ok(tracks) => {
                let background = Some(tracks.background_path)
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| self.resolve_remote_path(p));
                Ok((self.resolve_remote_path(tracks.vocals_path), background))
            }
            Err(RemoteError::Unavailable(reason)) => {
                tracing::warn!(
                    "Task {}: audio separator went away ({}), using the full mix",
                    task_id,
                    reason
                );
                Ok(unseparated)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Relative paths from remote services are relative to the storage root.
    fn resolve_remote_path(&self, path: PathBuf) -> PathBuf {
        if path.is_relative() {
            self.paths.base().join(path)
        } else {
            path
        }
    }

    async fn cut_segments(&self, vocals: &Path, segments: &[Segment]) -> CoreResult<()> {
        for (i, segment) in segments.iter().enumerate() {
            self.media
                .cut_segment(vocals, &segment.audio_segment_path, segment.start, segment.end)
                .await
                .map_err(step_failed(7, format!("cut segment {i}")))?;
        }
        Ok(())
    }

    /// Run `f` for every segment, at most `segment_concurrency` at a time,
    /// collecting results in segment order. The first error wins.
    async fn for_each_segment<'a, T, F, Fut>(
        &self,
        segments: &'a [Segment],
        mut f: F,
    ) -> CoreResult<Vec<T>>
    where
        F: FnMut(usize, &'a Segment) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let pending: Vec<Fut> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| f(i, segment))
            .collect();
        futures::stream::iter(pending)
            .buffered(self.options.segment_concurrency)
            .try_collect()
            .await
    }

    async fn polish(&self, settings: &RuntimeSettings, segments: &mut [Segment]) -> CoreResult<()> {
        let polished = self
            .for_each_segment(segments, |i, segment| {
                let request = PolishRequest {
                    text: segment.text.clone(),
                    video_type: settings.video_type.clone(),
                    custom_prompt: settings.polishing_custom_prompt.clone(),
                };
                async move {
                    self.ai
                        .polish(&request)
                        .await
                        .map_err(step_failed(8, format!("polish segment {i}")))
                }
            })
            .await?;

        for (segment, text) in segments.iter_mut().zip(polished) {
            segment.text = text;
        }
        Ok(())
    }

    async fn translate(
        &self,
        settings: &RuntimeSettings,
        segments: &mut [Segment],
    ) -> CoreResult<()> {
        let translated = self
            .for_each_segment(segments, |i, segment| {
                let duration = segment.duration_secs();
                let (min, max) = word_bounds(duration);
                let request = TranslateRequest {
                    text: segment.text.clone(),
                    source_lang: settings.source_lang.clone(),
                    target_lang: settings.target_lang.clone(),
                    video_type: settings.video_type.clone(),
                    duration_seconds: duration,
                    speaker_role: speaker_role(&segment.speaker_id),
                    target_word_min: min,
                    target_word_max: max,
                };
                async move {
                    let text = self
                        .ai
                        .translate(&request)
                        .await
                        .map_err(step_failed(9, format!("translate segment {i}")))?;
                    if text.trim().is_empty() {
                        return Err(step_failed(9, format!("translate segment {i}"))(
                            CoreError::ValidationError("empty translation".to_string()),
                        ));
                    }
                    Ok(text)
                }
            })
            .await?;

        for (segment, text) in segments.iter_mut().zip(translated) {
            segment.translated_text = text;
        }
        Ok(())
    }

    async fn optimize(
        &self,
        settings: &RuntimeSettings,
        segments: &mut [Segment],
    ) -> CoreResult<()> {
        let optimized = self
            .for_each_segment(segments, |i, segment| {
                let request = optimize_request(settings, segment);
                async move {
                    self.ai
                        .optimize(&request)
                        .await
                        .map_err(step_failed(10, format!("optimize segment {i}")))
                }
            })
            .await?;

        for (segment, text) in segments.iter_mut().zip(optimized) {
            if text.trim().is_empty() {
                tracing::warn!("Empty optimization result, keeping the translation");
                continue;
            }
            segment.translated_text = text;
        }
        Ok(())
    }

    /// Ask for a rewrite of translations whose length misses the word bounds.
    /// Failures keep the current translation.
    async fn enforce_length(
        &self,
        task_id: &str,
        settings: &RuntimeSettings,
        segments: &mut [Segment],
    ) {
        for (i, segment) in segments.iter_mut().enumerate() {
            let Some((min, max)) = length_violation(segment) else {
                continue;
            };
            tracing::info!(
                "Task {}: segment {} has {} chars, outside [{}, {}]; requesting a rewrite",
                task_id,
                i,
                segment.translated_text.chars().count(),
                min,
                max
            );
            match self.ai.optimize(&optimize_request(settings, segment)).await {
                Ok(text) if !text.trim().is_empty() => segment.translated_text = text,
                Ok(_) => tracing::warn!("Task {}: segment {} rewrite came back empty", task_id, i),
                Err(e) => tracing::warn!("Task {}: segment {} rewrite failed: {}", task_id, i, e),
            }
        }
    }

    /// Reference audio per segment, in segment order.
    async fn voice_references(
        &self,
        settings: &RuntimeSettings,
        segments: &[Segment],
        work_dir: &Path,
    ) -> CoreResult<Vec<PathBuf>> {
        if settings.voice_reference_mode == VoiceReferenceMode::Segment {
            return Ok(segments.iter().map(|s| s.audio_segment_path.clone()).collect());
        }

        let mut references: HashMap<SpeakerId, PathBuf> = HashMap::new();
        for (ordinal, (speaker, cuts)) in select_reference_cuts(segments).into_iter().enumerate() {
            let output = work_dir.join(format!(
                "speaker_{ordinal}_{}_reference.wav",
                file_component(&speaker)
            ));
            let reference = self
                .composer
                .merge_reference(&cuts, &output)
                .await
                .map_err(step_failed(11, format!("build reference for speaker {speaker}")))?;
            references.insert(speaker, reference);
        }

        segments
            .iter()
            .map(|s| {
                references.get(&s.speaker_id).cloned().ok_or_else(|| {
                    CoreError::Internal(format!("no reference for speaker {}", s.speaker_id))
                })
            })
            .collect()
    }

    async fn clone_voices(
        &self,
        settings: &RuntimeSettings,
        segments: &[Segment],
        work_dir: &Path,
    ) -> CoreResult<Vec<PathBuf>> {
        let references = self.voice_references(settings, segments, work_dir).await?;

        self.for_each_segment(segments, |i, segment| {
            let request = CloneVoiceRequest {
                speaker_id: segment.speaker_id.clone(),
                text: segment.translated_text.clone(),
                reference_audio: references[i].clone(),
            };
            async move {
                let path = self
                    .ai
                    .clone_voice(&request)
                    .await
                    .map_err(step_failed(11, format!("clone voice for segment {i}")))?;
                let path = self.resolve_remote_path(path);
                if !path.exists() {
                    return Err(step_failed(11, format!("clone voice for segment {i}"))(
                        CoreError::ValidationError(format!(
                            "cloned audio not found: {}",
                            path.display()
                        )),
                    ));
                }
                Ok(path)
            }
        })
        .await
    }

    /// Fit every cloned segment to its original duration.
    async fn correct_segments(
        &self,
        task_id: &str,
        segments: &[Segment],
        cloned: &[PathBuf],
        work_dir: &Path,
    ) -> CoreResult<Vec<AudioSegment>> {
        let mut aligned = Vec::with_capacity(segments.len());

        for (i, (segment, cloned_path)) in segments.iter().zip(cloned).enumerate() {
            let original = secs_to_duration(segment.duration_secs());
            let cloned_duration = self
                .media
                .probe_duration(cloned_path)
                .await
                .map_err(step_failed(12, format!("probe cloned segment {i}")))?;

            let decision = decide_segment_alignment(original, cloned_duration, &AlignPolicy::SEGMENT)
                .map_err(|e| correction_error(i, original, cloned_duration, e))?;
            tracing::debug!(
                "Task {}: segment {} original={:.3}s cloned={:.3}s -> {:?}",
                task_id,
                i,
                original.as_secs_f64(),
                cloned_duration.as_secs_f64(),
                decision
            );

            let adjusted = work_dir.join(format!("adjusted_segment_{i}.wav"));
            self.composer
                .apply_alignment(&decision, cloned_path, &adjusted)
                .await
                .map_err(step_failed(12, format!("adjust segment {i}")))?;

            if let AlignDecision::Stretch { .. } = decision {
                self.verify_stretch(task_id, i, &adjusted, original).await;
            }

            aligned.push(AudioSegment::new(secs_to_duration(segment.start), adjusted));
        }

        Ok(aligned)
    }

    async fn verify_stretch(
        &self,
        task_id: &str,
        index: usize,
        adjusted: &Path,
        expected: Duration,
    ) {
        let result = match self.media.probe_duration(adjusted).await {
            Ok(actual) => verify_duration(actual, expected, VERIFY_TOLERANCE),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(
                "Task {}: segment {} stretch verification failed, keeping result: {}",
                task_id,
                index,
                e
            );
        }
    }
}

fn optimize_request(settings: &RuntimeSettings, segment: &Segment) -> OptimizeRequest {
    let duration = segment.duration_secs();
    let (min, max) = word_bounds(duration);
    OptimizeRequest {
        text: segment.translated_text.clone(),
        target_duration_seconds: duration,
        target_word_min: min,
        target_word_max: max,
        speaker_role: speaker_role(&segment.speaker_id),
        video_type: settings.video_type.clone(),
    }
}

/// Flatten recognition output into segments with their cut paths assigned.
fn collect_segments(
    task_id: &str,
    speakers: Vec<RecognizedSpeaker>,
    work_dir: &Path,
) -> Vec<Segment> {
    let mut segments = Vec::new();

    // Sanitized ids can collide, so every cut name carries the speaker's
    // ordinal and a job-wide segment number.
    for (ordinal, speaker) in speakers.into_iter().enumerate() {
        let component = file_component(&speaker.speaker_id);
        for sentence in speaker.sentences {
            let valid = sentence.start_time.is_finite()
                && sentence.end_time.is_finite()
                && sentence.start_time >= 0.0
                && sentence.end_time > sentence.start_time;
            if !valid || sentence.text.trim().is_empty() {
                tracing::warn!(
                    "Task {}: skipping sentence of {} at [{}, {}]: empty or invalid",
                    task_id,
                    speaker.speaker_id,
                    sentence.start_time,
                    sentence.end_time
                );
                continue;
            }
            segments.push(Segment {
                speaker_id: speaker.speaker_id.clone(),
                text: sentence.text,
                translated_text: String::new(),
                start: sentence.start_time,
                end: sentence.end_time,
                audio_segment_path: work_dir.join(format!(
                    "speaker_{ordinal}_{component}_segment_{}.wav",
                    segments.len()
                )),
            });
        }
    }

    segments
}

fn correction_error(
    index: usize,
    original: Duration,
    cloned: Duration,
    err: CoreError,
) -> CoreError {
    let context = match &err {
        CoreError::SpeedRatioOutOfRange { ratio, min, max, .. } => {
            let suggestion = if *ratio < *min {
                "the translation is too long, shorten it or enable optimization"
            } else {
                "the translation is too short, lengthen it"
            };
            format!(
                "segment {index}: speed ratio {ratio:.3} outside [{min:.2}, {max:.2}], original {:.3}s, cloned {:.3}s; {suggestion}",
                original.as_secs_f64(),
                cloned.as_secs_f64()
            )
        }
        _ => format!("segment {index}: align cloned audio"),
    };
    CoreError::StepFailed {
        step: "12".to_string(),
        context,
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::{JobRunner, SlotPool, TaskPullLoop};
    use crate::core::pipeline::{JobOutcome, OrchestratorOptions};
    use crate::core::remote::{AiAdaptor, RecognizedSentence, RemoteResult};
    use crate::core::settings::{
        KEY_AUDIO_SEPARATION_ENABLED, KEY_LENGTH_ENFORCEMENT_ENABLED, KEY_OPTIMIZATION_ENABLED,
        KEY_POLISHING_ENABLED, KEY_VOICE_REFERENCE_MODE,
    };
    use crate::core::storage::{MemoryTaskStore, PathManager, TaskStatus, TaskStore};
    use crate::core::testing::{FakeAi, FakeMedia, FakeSeparator, SeparatorMode};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    const TASK: &str = "task-1";

    struct Harness {
        tmp: TempDir,
        media: Arc<FakeMedia>,
        store: Arc<MemoryTaskStore>,
        paths: PathManager,
        entry: QueueEntry,
    }

    impl Harness {
        async fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let media = Arc::new(FakeMedia::new());
            let paths = PathManager::new(tmp.path().join("storage"));
            let video = media.add_file(paths.original_path(TASK).unwrap(), Duration::from_secs(30));
            let store = Arc::new(MemoryTaskStore::new());
            let video = video.to_string_lossy().into_owned();
            store.create_task(TASK, &video).await.unwrap();
            // The pull loop would have popped this already.
            store.pop_task().await.unwrap();

            Self {
                tmp,
                media,
                store,
                paths,
                entry: QueueEntry {
                    task_id: TASK.to_string(),
                    original_file_path: video,
                },
            }
        }

        fn ai(&self) -> FakeAi {
            FakeAi::new(Arc::clone(&self.media), self.tmp.path().join("clones"))
        }

        async fn enable(&self, key: &str, value: &str) {
            let mut settings = HashMap::new();
            settings.insert(key.to_string(), value.to_string());
            self.store.set_app_settings(settings).await.unwrap();
        }

        fn orchestrator(&self, ai: impl AiAdaptor + 'static) -> Orchestrator {
            Orchestrator::new(
                self.store.clone(),
                self.media.clone(),
                Arc::new(ai),
                self.paths.clone(),
            )
        }

        fn work_file(&self, name: &str) -> PathBuf {
            self.paths.intermediate_path(TASK, name).unwrap()
        }

        async fn status(&self) -> (TaskStatus, String) {
            let record = self.store.get_task(TASK).await.unwrap();
            (record.status, record.error_message)
        }
    }

    #[tokio::test]
    async fn test_short_clone_is_padded_with_exact_silence() {
        let h = Harness::new().await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 1.0, 3.0)
            .clone_lasts("T:hello", Duration::from_millis(1700));
        let orchestrator = h.orchestrator(ai);

        let outcome = orchestrator.run_job(&h.entry).await;

        let output = h.paths.output_path(TASK).unwrap();
        assert_eq!(outcome, JobOutcome::Completed { result_path: output.clone() });
        assert_eq!(h.media.calls_named("pad_silence"), 1);
        assert_eq!(h.media.calls_named("time_stretch"), 0);
        assert_eq!(
            h.media.recorded_duration(&h.work_file("adjusted_segment_0.wav")),
            Some(Duration::from_secs(2))
        );
        // One second of lead silence before the utterance.
        assert_eq!(
            h.media.recorded_duration(&h.work_file(CONCATENATED_FILE)),
            Some(Duration::from_secs(3))
        );

        let record = h.store.get_task(TASK).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result_file_path, output.to_string_lossy());
        assert!(record.error_message.is_empty());
        assert!(output.exists());
        assert!(!h.paths.intermediate_dir(TASK).unwrap().exists());
    }

    #[tokio::test]
    async fn test_gap_between_utterances_is_preserved() {
        let h = Harness::new().await;
        // Recognition order differs from timeline order.
        let ai = h
            .ai()
            .with_sentence("b", "two", 4.0, 6.0)
            .with_sentence("a", "one", 0.0, 2.0)
            .clone_lasts("T:one", Duration::from_secs(2))
            .clone_lasts("T:two", Duration::from_secs(2));
        let ai = Arc::new(ai);
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        let outcome = orchestrator.run_job(&h.entry).await;
        assert!(outcome.is_completed(), "{outcome:?}");

        let inputs = h.media.last_concat_inputs();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0], h.work_file("adjusted_segment_0.wav"));
        assert_eq!(h.media.recorded_duration(&inputs[1]), Some(Duration::from_secs(2)));
        assert_eq!(inputs[2], h.work_file("adjusted_segment_1.wav"));
        assert_eq!(
            h.media.recorded_duration(&h.work_file(CONCATENATED_FILE)),
            Some(Duration::from_secs(6))
        );

        let requests = ai.clone_requests.lock().unwrap();
        assert_eq!(requests[0].text, "T:one");
        assert_eq!(requests[1].text, "T:two");
    }

    #[tokio::test]
    async fn test_out_of_band_clone_fails_with_ratio_and_bounds() {
        let h = Harness::new().await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 3.0)
            .clone_lasts("T:hello", Duration::from_secs(2));
        let orchestrator = h.orchestrator(ai);

        let outcome = orchestrator.run_job(&h.entry).await;

        let JobOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("step 12"), "{error}");
        assert!(error.contains("1.500"), "{error}");
        assert!(error.contains("[0.80, 1.20]"), "{error}");

        let (status, message) = h.status().await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(message, error);
        assert!(!h.work_file("adjusted_segment_0.wav").exists());
        assert_eq!(h.media.calls_named("remux"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_separator_degrades_to_full_mix() {
        let h = Harness::new().await;
        h.enable(KEY_AUDIO_SEPARATION_ENABLED, "true").await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 2.0)
            .clone_lasts("T:hello", Duration::from_secs(2));
        let orchestrator = h
            .orchestrator(ai)
            .with_separator(Arc::new(FakeSeparator::new(h.media.clone(), SeparatorMode::Down)));

        let outcome = orchestrator.run_job(&h.entry).await;

        assert!(outcome.is_completed(), "{outcome:?}");
        assert_eq!(h.media.calls_named("mix_tracks"), 0);
        assert_eq!(h.status().await.0, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_working_separator_mixes_background() {
        let h = Harness::new().await;
        h.enable(KEY_AUDIO_SEPARATION_ENABLED, "1").await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 2.0)
            .clone_lasts("T:hello", Duration::from_secs(2));
        let orchestrator = h
            .orchestrator(ai)
            .with_separator(Arc::new(FakeSeparator::new(h.media.clone(), SeparatorMode::Working)));

        assert!(orchestrator.run_job(&h.entry).await.is_completed());
        assert_eq!(h.media.calls_named("mix_tracks"), 1);
    }

    #[tokio::test]
    async fn test_separation_error_fails_job() {
        let h = Harness::new().await;
        h.enable(KEY_AUDIO_SEPARATION_ENABLED, "true").await;
        let orchestrator = h
            .orchestrator(h.ai().with_sentence("spk", "hello", 0.0, 2.0))
            .with_separator(Arc::new(FakeSeparator::new(h.media.clone(), SeparatorMode::Broken)));

        let outcome = orchestrator.run_job(&h.entry).await;

        let JobOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.starts_with("step 5 failed"), "{error}");
    }

    #[tokio::test]
    async fn test_missing_separator_with_flag_on_still_completes() {
        let h = Harness::new().await;
        h.enable(KEY_AUDIO_SEPARATION_ENABLED, "true").await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 2.0)
            .clone_lasts("T:hello", Duration::from_secs(2));

        assert!(h.orchestrator(ai).run_job(&h.entry).await.is_completed());
    }

    #[tokio::test]
    async fn test_polish_and_optimize_run_when_enabled() {
        let h = Harness::new().await;
        h.enable(KEY_POLISHING_ENABLED, "true").await;
        h.enable(KEY_OPTIMIZATION_ENABLED, "true").await;
        let ai = Arc::new(
            h.ai()
                .with_sentence("spk", "hello", 0.0, 2.0)
                .clone_lasts("O:T:P:hello", Duration::from_secs(2)),
        );
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        assert!(orchestrator.run_job(&h.entry).await.is_completed());

        assert_eq!(ai.translate_requests.lock().unwrap()[0].text, "P:hello");
        let optimize = ai.optimize_requests.lock().unwrap()[0].clone();
        assert_eq!(optimize.text, "T:P:hello");
        assert_eq!((optimize.target_word_min, optimize.target_word_max), (6, 9));
        assert_eq!(ai.clone_requests.lock().unwrap()[0].text, "O:T:P:hello");
    }

    #[tokio::test]
    async fn test_optional_stages_skipped_by_default() {
        let h = Harness::new().await;
        let ai = Arc::new(
            h.ai()
                .with_sentence("", "hello", 0.0, 2.0)
                .clone_lasts("T:hello", Duration::from_secs(2)),
        );
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        assert!(orchestrator.run_job(&h.entry).await.is_completed());
        assert_eq!(ai.calls_named("polish"), 0);
        assert_eq!(ai.calls_named("optimize"), 0);

        let translate = ai.translate_requests.lock().unwrap()[0].clone();
        assert_eq!(translate.source_lang, "en");
        assert_eq!(translate.target_lang, "zh");
        assert_eq!(translate.speaker_role, "default-speaker");
    }

    #[tokio::test]
    async fn test_length_enforcement_rewrites_long_translation() {
        let h = Harness::new().await;
        h.enable(KEY_LENGTH_ENFORCEMENT_ENABLED, "true").await;
        // One second allows 3 to 5 characters; "T:hello" has 7.
        let ai = Arc::new(
            h.ai()
                .with_sentence("spk", "hello", 0.0, 1.0)
                .clone_lasts("O:T:hello", Duration::from_secs(1)),
        );
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        assert!(orchestrator.run_job(&h.entry).await.is_completed());
        assert_eq!(ai.calls_named("optimize"), 1);
        assert_eq!(ai.clone_requests.lock().unwrap()[0].text, "O:T:hello");
    }

    #[tokio::test]
    async fn test_speaker_reference_mode_merges_cuts() {
        let h = Harness::new().await;
        h.enable(KEY_VOICE_REFERENCE_MODE, "speaker").await;
        let ai = Arc::new(
            h.ai()
                .with_sentence("a", "one", 0.0, 2.0)
                .with_sentence("a", "two", 3.0, 5.0)
                .clone_lasts("T:one", Duration::from_secs(2))
                .clone_lasts("T:two", Duration::from_secs(2)),
        );
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        assert!(orchestrator.run_job(&h.entry).await.is_completed());

        let reference = h.work_file("speaker_0_a_reference.wav");
        let requests = ai.clone_requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.reference_audio == reference));
        assert_eq!(h.media.recorded_duration(&reference), Some(Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_colliding_speaker_names_keep_their_own_reference() {
        let h = Harness::new().await;
        h.enable(KEY_VOICE_REFERENCE_MODE, "speaker").await;
        let ai = Arc::new(
            h.ai()
                .with_sentence("a b", "one", 0.0, 2.0)
                .with_sentence("a_b", "two", 3.0, 6.0)
                .clone_lasts("T:one", Duration::from_secs(2))
                .clone_lasts("T:two", Duration::from_secs(3)),
        );
        let orchestrator = Orchestrator::new(
            h.store.clone(),
            h.media.clone(),
            ai.clone(),
            h.paths.clone(),
        );

        assert!(orchestrator.run_job(&h.entry).await.is_completed());

        let requests = ai.clone_requests.lock().unwrap();
        let reference_of = |speaker: &str| {
            requests
                .iter()
                .find(|r| r.speaker_id == speaker)
                .map(|r| r.reference_audio.clone())
                .unwrap()
        };
        let first = reference_of("a b");
        let second = reference_of("a_b");
        assert_ne!(first, second);
        assert_eq!(h.media.recorded_duration(&first), Some(Duration::from_secs(2)));
        assert_eq!(h.media.recorded_duration(&second), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_collect_segments_names_are_unique_across_speakers() {
        let work = Path::new("/work");
        let speaker = |id: &str, start: f64| RecognizedSpeaker {
            speaker_id: id.to_string(),
            sentences: vec![RecognizedSentence {
                text: "hi".to_string(),
                start_time: start,
                end_time: start + 1.0,
            }],
        };

        let segments = collect_segments("t", vec![speaker("a b", 0.0), speaker("a_b", 2.0)], work);

        assert_eq!(segments[0].audio_segment_path, work.join("speaker_0_a_b_segment_0.wav"));
        assert_eq!(segments[1].audio_segment_path, work.join("speaker_1_a_b_segment_1.wav"));
    }

    #[tokio::test]
    async fn test_pull_loop_dispatches_orchestrator() {
        let h = Harness::new().await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 2.0)
            .with_sentence("spk", "again", 3.0, 5.0);
        let runner: Arc<dyn JobRunner> = Arc::new(
            h.orchestrator(ai).with_options(OrchestratorOptions {
                cleanup_intermediate: true,
                segment_concurrency: 2,
            }),
        );
        h.store.push_task(&h.entry.to_json().unwrap()).await.unwrap();
        let pull_loop = TaskPullLoop::new(
            h.store.clone(),
            runner,
            SlotPool::new(1),
            Duration::from_secs(1),
        );

        pull_loop.pull_once().await.unwrap().await.unwrap();

        assert_eq!(h.status().await.0, TaskStatus::Completed);
        assert_eq!(pull_loop.slots().in_use(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_fails_job_with_step() {
        let h = Harness::new().await;
        let ai = h.ai().with_sentence("spk", "hello", 0.0, 2.0).failing("translate");

        let outcome = h.orchestrator(ai).run_job(&h.entry).await;

        let JobOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.starts_with("step 9 failed (translate segment 0)"), "{error}");
        let (status, message) = h.status().await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(message, error);
    }

    #[tokio::test]
    async fn test_no_speech_fails_job() {
        let h = Harness::new().await;
        let outcome = h.orchestrator(h.ai()).run_job(&h.entry).await;
        assert!(matches!(outcome, JobOutcome::Failed { ref error } if error.contains("no speech")));
    }

    #[tokio::test]
    async fn test_finished_task_is_not_rerun() {
        let h = Harness::new().await;
        let ai = h
            .ai()
            .with_sentence("spk", "hello", 0.0, 2.0)
            .clone_lasts("T:hello", Duration::from_secs(2));
        let orchestrator = h.orchestrator(ai);
        assert!(orchestrator.run_job(&h.entry).await.is_completed());
        let extracted = h.media.calls_named("extract_audio");

        let outcome = orchestrator.run_job(&h.entry).await;

        assert!(!outcome.is_completed());
        assert_eq!(h.status().await.0, TaskStatus::Completed);
        assert_eq!(h.media.calls_named("extract_audio"), extracted);
    }

    #[tokio::test]
    async fn test_parallel_segments_keep_timeline_order() {
        let h = Harness::new().await;
        let ai = h
            .ai()
            .with_sentence("a", "one", 0.0, 1.0)
            .with_sentence("a", "two", 1.5, 2.5)
            .with_sentence("b", "three", 3.0, 4.0)
            .clone_lasts("T:one", Duration::from_secs(1))
            .clone_lasts("T:two", Duration::from_secs(1))
            .clone_lasts("T:three", Duration::from_secs(1));
        let orchestrator = h.orchestrator(ai).with_options(OrchestratorOptions {
            cleanup_intermediate: false,
            segment_concurrency: 3,
        });

        assert!(orchestrator.run_job(&h.entry).await.is_completed());

        let inputs = h.media.last_concat_inputs();
        let adjusted: Vec<_> = inputs
            .iter()
            .filter(|p| p.to_string_lossy().contains("adjusted_segment_"))
            .cloned()
            .collect();
        assert_eq!(
            adjusted,
            vec![
                h.work_file("adjusted_segment_0.wav"),
                h.work_file("adjusted_segment_1.wav"),
                h.work_file("adjusted_segment_2.wav"),
            ]
        );
        assert!(h.paths.intermediate_dir(TASK).unwrap().exists());
    }

    struct PanickingAi;

    #[async_trait]
    impl AiAdaptor for PanickingAi {
        async fn recognize(&self, _audio_path: &Path) -> RemoteResult<Vec<RecognizedSpeaker>> {
            panic!("recognizer exploded");
        }
        async fn polish(&self, _request: &PolishRequest) -> RemoteResult<String> {
            unreachable!()
        }
        async fn translate(&self, _request: &TranslateRequest) -> RemoteResult<String> {
            unreachable!()
        }
        async fn optimize(&self, _request: &OptimizeRequest) -> RemoteResult<String> {
            unreachable!()
        }
        async fn clone_voice(&self, _request: &CloneVoiceRequest) -> RemoteResult<PathBuf> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let h = Harness::new().await;

        let outcome = h.orchestrator(PanickingAi).run_job(&h.entry).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "panic: recognizer exploded".to_string()
            }
        );
        let (status, message) = h.status().await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(message, "panic: recognizer exploded");
    }

    #[test]
    fn test_collect_segments_skips_invalid_sentences() {
        let work = Path::new("/work");
        let speakers = vec![RecognizedSpeaker {
            speaker_id: "spk 1".to_string(),
            sentences: vec![
                RecognizedSentence {
                    text: "ok".to_string(),
                    start_time: 0.0,
                    end_time: 1.0,
                },
                RecognizedSentence {
                    text: "backwards".to_string(),
                    start_time: 2.0,
                    end_time: 1.0,
                },
                RecognizedSentence {
                    text: "also ok".to_string(),
                    start_time: 3.0,
                    end_time: 4.0,
                },
            ],
        }];

        let segments = collect_segments("t", speakers, work);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].audio_segment_path, work.join("speaker_0_spk_1_segment_0.wav"));
        assert_eq!(segments[1].audio_segment_path, work.join("speaker_0_spk_1_segment_1.wav"));
    }

    #[test]
    fn test_correction_error_message() {
        let err = correction_error(
            3,
            Duration::from_secs(3),
            Duration::from_secs(2),
            CoreError::SpeedRatioOutOfRange {
                ratio: 1.5,
                min: 0.8,
                max: 1.2,
                reference_secs: 3.0,
                translated_secs: 2.0,
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("step 12 failed (segment 3: speed ratio 1.500 outside [0.80, 1.20]"));
        assert!(msg.contains("too short"));
    }
}

//! In-memory fakes for the media toolkit and remote services.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ffmpeg::{FFmpegError, FFmpegResult, MediaToolkit};
use crate::core::remote::{
    AiAdaptor, AudioSeparator, CloneVoiceRequest, OptimizeRequest, PolishRequest,
    RecognizedSentence, RecognizedSpeaker, RemoteError, RemoteResult, SeparatedTracks,
    TranslateRequest,
};
use crate::core::TimeSec;

// =============================================================================
// Fake Media Toolkit
// =============================================================================

/// Media toolkit that writes placeholder files and tracks their durations.
pub struct FakeMedia {
    durations: Mutex<HashMap<PathBuf, Duration>>,
    calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a placeholder file with a known duration.
    pub fn add_file(&self, path: impl Into<PathBuf>, duration: Duration) -> PathBuf {
        let path = path.into();
        self.write(&path, duration).unwrap();
        path
    }

    /// Duration of a file that still exists.
    pub fn duration_of(&self, path: &Path) -> Option<Duration> {
        if !path.exists() {
            return None;
        }
        self.recorded_duration(path)
    }

    /// Duration recorded for a path, whether or not the file is still there.
    pub fn recorded_duration(&self, path: &Path) -> Option<Duration> {
        self.durations.lock().unwrap().get(path).copied()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub fn last_concat_inputs(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == "concat_list")
            .map(|(_, paths)| paths.clone())
            .unwrap_or_default()
    }

    fn record(&self, name: &str, paths: &[&Path]) {
        self.calls.lock().unwrap().push((
            name.to_string(),
            paths.iter().map(|p| p.to_path_buf()).collect(),
        ));
    }

    fn write(&self, path: &Path, duration: Duration) -> FFmpegResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"fake-audio")?;
        self.durations
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), duration);
        Ok(())
    }

    fn lookup(&self, path: &Path) -> FFmpegResult<Duration> {
        if !path.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                path.display()
            )));
        }
        self.recorded_duration(path)
            .ok_or_else(|| FFmpegError::ProbeError(format!("unknown file {}", path.display())))
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn extract_audio(&self, video: &Path, output: &Path) -> FFmpegResult<()> {
        self.record("extract_audio", &[video, output]);
        let d = self.lookup(video)?;
        self.write(output, d)
    }

    async fn cut_segment(
        &self,
        source: &Path,
        output: &Path,
        start: TimeSec,
        end: TimeSec,
    ) -> FFmpegResult<()> {
        self.record("cut_segment", &[source, output]);
        self.lookup(source)?;
        if end <= start {
            return Err(FFmpegError::InvalidInput("bad range".to_string()));
        }
        self.write(output, Duration::from_secs_f64(end - start))
    }

    async fn probe_duration(&self, input: &Path) -> FFmpegResult<Duration> {
        self.record("probe_duration", &[input]);
        self.lookup(input)
    }

    async fn time_stretch(&self, input: &Path, ratio: f64, output: &Path) -> FFmpegResult<()> {
        self.record("time_stretch", &[input, output]);
        let d = self.lookup(input)?;
        self.write(output, Duration::from_secs_f64(d.as_secs_f64() / ratio))
    }

    async fn pad_silence(&self, input: &Path, pad: Duration, output: &Path) -> FFmpegResult<()> {
        self.record("pad_silence", &[input, output]);
        let d = self.lookup(input)?;
        self.write(output, d + pad)
    }

    async fn generate_silence(&self, duration: Duration, output: &Path) -> FFmpegResult<()> {
        self.record("generate_silence", &[output]);
        self.write(output, duration)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> FFmpegResult<()> {
        self.record("transcode", &[input, output]);
        let d = self.lookup(input)?;
        self.write(output, d)
    }

    async fn concat_list(&self, inputs: &[PathBuf], output: &Path) -> FFmpegResult<()> {
        let mut total = Duration::ZERO;
        for input in inputs {
            total += self.lookup(input)?;
        }
        self.calls
            .lock()
            .unwrap()
            .push(("concat_list".to_string(), inputs.to_vec()));
        self.write(output, total)
    }

    async fn mix_tracks(
        &self,
        vocals: &Path,
        background: &Path,
        output: &Path,
    ) -> FFmpegResult<()> {
        self.record("mix_tracks", &[vocals, background, output]);
        let d = self.lookup(vocals)?;
        self.lookup(background)?;
        self.write(output, d)
    }

    async fn remux(&self, video: &Path, audio: &Path, output: &Path) -> FFmpegResult<()> {
        self.record("remux", &[video, audio, output]);
        let d = self.lookup(video)?;
        self.lookup(audio)?;
        self.write(output, d)
    }

    async fn stream_copy(&self, input: &Path, output: &Path) -> FFmpegResult<()> {
        self.record("stream_copy", &[input, output]);
        let d = self.lookup(input)?;
        self.write(output, d)
    }
}

// =============================================================================
// Fake AI Adaptor
// =============================================================================

/// AI adaptor with canned recognition and deterministic text transforms.
///
/// Polish prefixes `P:`, translate prefixes `T:` and optimize prefixes `O:`.
/// Cloned audio lasts whatever was registered for the text, or one second.
pub struct FakeAi {
    media: Arc<FakeMedia>,
    clone_dir: PathBuf,
    speakers: Vec<RecognizedSpeaker>,
    clone_durations: Mutex<HashMap<String, Duration>>,
    fail_on: Mutex<Option<String>>,
    pub translate_requests: Mutex<Vec<TranslateRequest>>,
    pub optimize_requests: Mutex<Vec<OptimizeRequest>>,
    pub clone_requests: Mutex<Vec<CloneVoiceRequest>>,
    calls: Mutex<Vec<String>>,
}

impl FakeAi {
    pub fn new(media: Arc<FakeMedia>, clone_dir: impl Into<PathBuf>) -> Self {
        Self {
            media,
            clone_dir: clone_dir.into(),
            speakers: Vec::new(),
            clone_durations: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
            translate_requests: Mutex::new(Vec::new()),
            optimize_requests: Mutex::new(Vec::new()),
            clone_requests: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a recognized sentence for `speaker`.
    pub fn with_sentence(mut self, speaker: &str, text: &str, start: TimeSec, end: TimeSec) -> Self {
        let sentence = RecognizedSentence {
            text: text.to_string(),
            start_time: start,
            end_time: end,
        };
        match self.speakers.iter_mut().find(|s| s.speaker_id == speaker) {
            Some(existing) => existing.sentences.push(sentence),
            None => self.speakers.push(RecognizedSpeaker {
                speaker_id: speaker.to_string(),
                sentences: vec![sentence],
            }),
        }
        self
    }

    /// Duration of the clone synthesized for `text`.
    pub fn clone_lasts(self, text: &str, duration: Duration) -> Self {
        self.clone_durations
            .lock()
            .unwrap()
            .insert(text.to_string(), duration);
        self
    }

    /// Make every call of `operation` fail with a 500.
    pub fn failing(self, operation: &str) -> Self {
        *self.fail_on.lock().unwrap() = Some(operation.to_string());
        self
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    fn enter(&self, name: &str) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_on.lock().unwrap().as_deref() == Some(name) {
            return Err(RemoteError::Status {
                code: 500,
                body: format!("{name} exploded"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AiAdaptor for FakeAi {
    async fn recognize(&self, audio_path: &Path) -> RemoteResult<Vec<RecognizedSpeaker>> {
        self.enter("recognize")?;
        if !audio_path.exists() {
            return Err(RemoteError::Request(format!("missing {}", audio_path.display())));
        }
        Ok(self.speakers.clone())
    }

    async fn polish(&self, request: &PolishRequest) -> RemoteResult<String> {
        self.enter("polish")?;
        Ok(format!("P:{}", request.text))
    }

    async fn translate(&self, request: &TranslateRequest) -> RemoteResult<String> {
        self.enter("translate")?;
        self.translate_requests.lock().unwrap().push(request.clone());
        Ok(format!("T:{}", request.text))
    }

    async fn optimize(&self, request: &OptimizeRequest) -> RemoteResult<String> {
        self.enter("optimize")?;
        self.optimize_requests.lock().unwrap().push(request.clone());
        Ok(format!("O:{}", request.text))
    }

    async fn clone_voice(&self, request: &CloneVoiceRequest) -> RemoteResult<PathBuf> {
        self.enter("clone_voice")?;
        if !request.reference_audio.exists() {
            return Err(RemoteError::Request(format!(
                "missing reference {}",
                request.reference_audio.display()
            )));
        }
        let index = {
            let mut requests = self.clone_requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let duration = self
            .clone_durations
            .lock()
            .unwrap()
            .get(&request.text)
            .copied()
            .unwrap_or(Duration::from_secs(1));
        let path = self.clone_dir.join(format!("clone_{index}.wav"));
        Ok(self.media.add_file(path, duration))
    }
}

// =============================================================================
// Fake Audio Separator
// =============================================================================

/// How a [`FakeSeparator`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorMode {
    /// Health check and separation succeed
    Working,
    /// Health check fails
    Down,
    /// Health check passes but separation returns a hard error
    Broken,
}

pub struct FakeSeparator {
    media: Arc<FakeMedia>,
    mode: SeparatorMode,
}

impl FakeSeparator {
    pub fn new(media: Arc<FakeMedia>, mode: SeparatorMode) -> Self {
        Self { media, mode }
    }
}

#[async_trait]
impl AudioSeparator for FakeSeparator {
    async fn health_check(&self) -> RemoteResult<()> {
        match self.mode {
            SeparatorMode::Down => Err(RemoteError::Unavailable("connection refused".to_string())),
            _ => Ok(()),
        }
    }

    async fn separate(&self, audio_path: &Path, output_dir: &Path) -> RemoteResult<SeparatedTracks> {
        if self.mode == SeparatorMode::Broken {
            return Err(RemoteError::Status {
                code: 422,
                body: "unsupported audio".to_string(),
            });
        }
        let duration = self
            .media
            .duration_of(audio_path)
            .ok_or_else(|| RemoteError::Request(format!("missing {}", audio_path.display())))?;
        Ok(SeparatedTracks {
            vocals_path: self.media.add_file(output_dir.join("vocals.wav"), duration),
            background_path: self.media.add_file(output_dir.join("background.wav"), duration),
        })
    }
}

//! Remote Pipeline Services
//!
//! Interfaces of the sibling services the orchestrator calls: the AI adaptor
//! (recognition, polishing, translation, optimization, voice cloning) and the
//! audio separator. [`http`] holds the JSON-over-HTTP clients.

pub mod http;

pub use http::{HttpAiAdaptor, HttpAudioSeparator};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{SpeakerId, TimeSec};

// =============================================================================
// Errors
// =============================================================================

/// Remote call failures
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The service could not be reached at all
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) => true,
            RemoteError::Status { code, .. } => *code == 429 || *code >= 500,
            RemoteError::Request(_) | RemoteError::Decode(_) => false,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Request / Response Types
// =============================================================================

/// One recognized sentence with timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSentence {
    pub text: String,
    pub start_time: TimeSec,
    pub end_time: TimeSec,
}

/// Sentences attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSpeaker {
    pub speaker_id: SpeakerId,
    pub sentences: Vec<RecognizedSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolishRequest {
    pub text: String,
    pub video_type: String,
    pub custom_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub video_type: String,
    pub duration_seconds: TimeSec,
    pub speaker_role: String,
    pub target_word_min: u32,
    pub target_word_max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub text: String,
    pub target_duration_seconds: TimeSec,
    pub target_word_min: u32,
    pub target_word_max: u32,
    pub speaker_role: String,
    pub video_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneVoiceRequest {
    pub speaker_id: SpeakerId,
    pub text: String,
    pub reference_audio: PathBuf,
}

/// Result of vocal/background separation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparatedTracks {
    pub vocals_path: PathBuf,
    pub background_path: PathBuf,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Recognition, text and voice services.
///
/// Implementations retry transient failures themselves; the orchestrator
/// treats any returned error as final.
#[async_trait]
pub trait AiAdaptor: Send + Sync {
    /// Speaker-attributed, time-stamped sentences of an audio file.
    async fn recognize(&self, audio_path: &Path) -> RemoteResult<Vec<RecognizedSpeaker>>;

    async fn polish(&self, request: &PolishRequest) -> RemoteResult<String>;

    async fn translate(&self, request: &TranslateRequest) -> RemoteResult<String>;

    async fn optimize(&self, request: &OptimizeRequest) -> RemoteResult<String>;

    /// Synthesize `text` in the voice of the reference audio; returns the audio path.
    async fn clone_voice(&self, request: &CloneVoiceRequest) -> RemoteResult<PathBuf>;
}

/// Vocal/background separation service.
#[async_trait]
pub trait AudioSeparator: Send + Sync {
    async fn health_check(&self) -> RemoteResult<()>;

    /// Split `audio_path` into vocals and background written under `output_dir`.
    async fn separate(&self, audio_path: &Path, output_dir: &Path)
        -> RemoteResult<SeparatedTracks>;
}

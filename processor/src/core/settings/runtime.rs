//! Typed runtime settings, read once per job from the stored snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const KEY_AUDIO_SEPARATION_ENABLED: &str = "audio_separation_enabled";
pub const KEY_POLISHING_ENABLED: &str = "polishing_enabled";
pub const KEY_OPTIMIZATION_ENABLED: &str = "optimization_enabled";
pub const KEY_SOURCE_LANG: &str = "source_lang";
pub const KEY_TARGET_LANG: &str = "target_lang";
pub const KEY_VIDEO_TYPE: &str = "translation_video_type";
pub const KEY_POLISHING_CUSTOM_PROMPT: &str = "polishing_custom_prompt";
pub const KEY_VOICE_REFERENCE_MODE: &str = "voice_reference_mode";
pub const KEY_LENGTH_ENFORCEMENT_ENABLED: &str = "length_enforcement_enabled";

/// Every key the runtime view understands.
pub const KNOWN_KEYS: &[&str] = &[
    KEY_AUDIO_SEPARATION_ENABLED,
    KEY_POLISHING_ENABLED,
    KEY_OPTIMIZATION_ENABLED,
    KEY_SOURCE_LANG,
    KEY_TARGET_LANG,
    KEY_VIDEO_TYPE,
    KEY_POLISHING_CUSTOM_PROMPT,
    KEY_VOICE_REFERENCE_MODE,
    KEY_LENGTH_ENFORCEMENT_ENABLED,
];

/// Which audio the voice-cloning call receives as reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceReferenceMode {
    /// The segment's own cut from the source track
    #[default]
    Segment,
    /// Up to 12 seconds of the speaker's cuts joined together
    Speaker,
}

/// Runtime feature toggles and language parameters for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub audio_separation_enabled: bool,
    pub polishing_enabled: bool,
    pub optimization_enabled: bool,
    pub source_lang: String,
    pub target_lang: String,
    pub video_type: String,
    pub polishing_custom_prompt: String,
    pub voice_reference_mode: VoiceReferenceMode,
    pub length_enforcement_enabled: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            audio_separation_enabled: false,
            polishing_enabled: false,
            optimization_enabled: false,
            source_lang: "en".to_string(),
            target_lang: "zh".to_string(),
            video_type: "general".to_string(),
            polishing_custom_prompt: String::new(),
            voice_reference_mode: VoiceReferenceMode::Segment,
            length_enforcement_enabled: false,
        }
    }
}

impl RuntimeSettings {
    /// Build the typed view from a flat snapshot.
    ///
    /// Absent keys take their defaults. Unparseable values also fall back to
    /// the default, with a warning.
    pub fn from_snapshot(snapshot: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: &str| -> String {
            snapshot
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            audio_separation_enabled: bool_setting(
                snapshot,
                KEY_AUDIO_SEPARATION_ENABLED,
                defaults.audio_separation_enabled,
            ),
            polishing_enabled: bool_setting(snapshot, KEY_POLISHING_ENABLED, defaults.polishing_enabled),
            optimization_enabled: bool_setting(
                snapshot,
                KEY_OPTIMIZATION_ENABLED,
                defaults.optimization_enabled,
            ),
            source_lang: text(KEY_SOURCE_LANG, &defaults.source_lang),
            target_lang: text(KEY_TARGET_LANG, &defaults.target_lang),
            video_type: text(KEY_VIDEO_TYPE, &defaults.video_type),
            // The prompt may legitimately be empty, so it is taken verbatim.
            polishing_custom_prompt: snapshot
                .get(KEY_POLISHING_CUSTOM_PROMPT)
                .cloned()
                .unwrap_or_default(),
            voice_reference_mode: match snapshot.get(KEY_VOICE_REFERENCE_MODE).map(|v| v.trim()) {
                None | Some("") => defaults.voice_reference_mode,
                Some(v) if v.eq_ignore_ascii_case("segment") => VoiceReferenceMode::Segment,
                Some(v) if v.eq_ignore_ascii_case("speaker") => VoiceReferenceMode::Speaker,
                Some(other) => {
                    tracing::warn!(
                        "Invalid {} value {:?}, using default",
                        KEY_VOICE_REFERENCE_MODE,
                        other
                    );
                    defaults.voice_reference_mode
                }
            },
            length_enforcement_enabled: bool_setting(
                snapshot,
                KEY_LENGTH_ENFORCEMENT_ENABLED,
                defaults.length_enforcement_enabled,
            ),
        }
    }
}

/// Parse a boolean literal: `1 t T true TRUE True` and `0 f F false FALSE False`.
pub fn parse_bool_literal(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn bool_setting(snapshot: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match snapshot.get(key) {
        None => default,
        Some(raw) => parse_bool_literal(raw).unwrap_or_else(|| {
            tracing::warn!("Invalid boolean for {}: {:?}, using default {}", key, raw, default);
            default
        }),
    }
}

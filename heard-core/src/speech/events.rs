//! Wire events received from the realtime speech service.
//!
//! The service tags every message with a `message` field; the six kinds the
//! engine consumes are modelled as one sum type so that handling is
//! exhaustive — a new message kind is a compile error at the match site, not
//! a silent no-op.

use serde::{Deserialize, Serialize};

/// Speaker label used when diarization could not attribute a result.
pub const UNKNOWN_SPEAKER: &str = "UU";

/// One event from the realtime speech session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum SpeechEvent {
    /// Provisional transcript — replaces the previous partial display value.
    AddPartialTranscript {
        #[serde(default)]
        results: Vec<RecognitionResult>,
    },
    /// Committed transcript for one or more speaker spans.
    AddTranscript {
        #[serde(default)]
        results: Vec<RecognitionResult>,
    },
    /// Provisional translation — replaces the previous partial display value.
    AddPartialTranslation {
        #[serde(default)]
        results: Vec<TranslationResult>,
    },
    /// Committed translation, matched to a segment by speaker.
    AddTranslation {
        #[serde(default)]
        results: Vec<TranslationResult>,
    },
    /// The service has flushed all audio and will send nothing further.
    EndOfTranscript,
    /// Fatal service-side error; the session is unusable afterwards.
    Error {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// One diarized recognition result (a word or punctuation token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub alternatives: Vec<RecognitionAlternative>,
}

/// A single hypothesis for a recognition result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionAlternative {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub speaker: Option<String>,
}

/// One translated token; translations carry content and speaker directly,
/// without an alternatives list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationResult {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub speaker: Option<String>,
}

impl RecognitionResult {
    /// Content of the top hypothesis, or `""` when none exists.
    pub fn content(&self) -> &str {
        self.alternatives
            .first()
            .map(|a| a.content.as_str())
            .unwrap_or("")
    }

    /// Speaker of the top hypothesis, defaulting to [`UNKNOWN_SPEAKER`].
    pub fn speaker(&self) -> &str {
        self.alternatives
            .first()
            .and_then(|a| a.speaker.as_deref())
            .unwrap_or(UNKNOWN_SPEAKER)
    }
}

impl TranslationResult {
    pub fn speaker(&self) -> &str {
        self.speaker.as_deref().unwrap_or(UNKNOWN_SPEAKER)
    }
}

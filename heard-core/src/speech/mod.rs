//! Realtime speech session abstraction.
//!
//! The `SpeechSession` trait decouples the engine from any specific realtime
//! transcription provider. The production implementation is a WebSocket
//! client owned by the embedding application; tests use scripted sessions.
//!
//! `&mut self` intentionally expresses that sessions are stateful (an open
//! socket, a sequence number). All mutation is serialised through
//! `SessionHandle`'s `parking_lot::Mutex`.

pub mod events;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::RecorderConfig;
use crate::error::Result;
use events::SpeechEvent;

/// Contract for realtime speech-session backends.
///
/// Events are pushed into the channel handed to [`start`](Self::start); the
/// engine consumes them strictly in arrival order. Implementations must stop
/// sending after [`stop`](Self::stop) or after emitting
/// [`SpeechEvent::EndOfTranscript`].
pub trait SpeechSession: Send + 'static {
    /// Open the session: authenticate with `token`, submit `config`, begin
    /// delivering events into `events`.
    ///
    /// # Errors
    /// Returns an error if the service rejects the token or configuration.
    fn start(
        &mut self,
        token: &str,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<SpeechEvent>,
    ) -> Result<()>;

    /// Forward one binary audio chunk (PCM, rate per the session config).
    fn send_audio(&mut self, pcm: &[u8]) -> Result<()>;

    /// Request graceful termination. The service is expected to flush
    /// remaining audio and finish with `EndOfTranscript`.
    fn stop(&mut self) -> Result<()>;
}

/// Thread-safe reference-counted handle to any `SpeechSession` implementor.
#[derive(Clone)]
pub struct SessionHandle(pub Arc<Mutex<dyn SpeechSession>>);

impl SessionHandle {
    /// Wrap any `SpeechSession` in a `SessionHandle`.
    pub fn new<S: SpeechSession>(session: S) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Wire configuration
// ---------------------------------------------------------------------------

/// Configuration submitted when the session starts. Field names match the
/// realtime service's wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub transcription_config: TranscriptionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_config: Option<TranslationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub language: String,
    pub enable_partials: bool,
    pub operating_point: String,
    pub diarization: String,
    pub speaker_diarization_config: SpeakerDiarizationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerDiarizationConfig {
    pub max_speakers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub enable_partials: bool,
    pub target_languages: Vec<String>,
}

impl SessionConfig {
    /// Build the wire configuration from engine settings. A translation
    /// block is included only when a target language is configured.
    pub fn from_recorder(config: &RecorderConfig) -> Self {
        Self {
            transcription_config: TranscriptionConfig {
                language: config.source_language.clone(),
                enable_partials: config.enable_partials,
                operating_point: config.operating_point.clone(),
                diarization: "speaker".into(),
                speaker_diarization_config: SpeakerDiarizationConfig {
                    max_speakers: config.max_speakers,
                },
            },
            translation_config: config.target_language.as_ref().map(|target| {
                TranslationConfig {
                    enable_partials: config.enable_partials,
                    target_languages: vec![target.clone()],
                }
            }),
        }
    }
}

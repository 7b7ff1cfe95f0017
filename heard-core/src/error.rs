use thiserror::Error;

/// All errors produced by heard-core.
#[derive(Debug, Error)]
pub enum HeardError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("speech token fetch failed: {0}")]
    TokenFetch(String),

    #[error("speech session error: {0}")]
    SpeechSession(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("no active conversation selected")]
    NoConversation,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HeardError>;

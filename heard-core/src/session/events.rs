//! Events emitted by the recording session for display layers.

use serde::{Deserialize, Serialize};

use crate::reconcile::TranscriptSegment;

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No recording in progress.
    Idle,
    /// Acquiring the microphone and a speech-session token.
    Starting,
    /// Capturing audio and reconciling events.
    Recording,
    /// Winding down capture and the speech session.
    Stopping,
    /// Persisting the final segment list.
    Saving,
}

/// Emitted whenever the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Incremental transcript output for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TranscriptUpdate {
    /// The ordered segment list changed (append, merge, or translation).
    Segments { segments: Vec<TranscriptSegment> },
    /// The live partial-transcript display value; empty when cleared.
    PartialTranscript { text: String },
    /// The live partial-translation display value; empty when cleared.
    PartialTranslation { speaker: String, text: String },
}

//! # heard-core
//!
//! Reusable live-conversation engine: diarized transcript reconciliation,
//! asynchronous translation matching, and streamed next-utterance
//! predictions.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioFeed → SPSC RingBuffer → PcmChunker ──► SpeechSession
//!                                                               │ events
//!                                                               ▼
//!                               RecordingSession event loop ── TranscriptReconciler
//!                                      │                         │ segment list
//!                        broadcast::Sender<TranscriptUpdate>     ▼
//!                                      │               PredictionController
//!                                      │                         │ NDJSON stream
//!                                      ▼                         ▼
//!                                  display           broadcast::Sender<PredictionUpdate>
//! ```
//!
//! The audio callback is zero-alloc after warm-up; all reconciliation-state
//! mutation happens on one event-loop task per recording, so ordering
//! guarantees come from event arrival order rather than locking discipline.
//! The realtime speech service itself is an external dependency behind the
//! [`SpeechSession`] trait.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod predict;
pub mod reconcile;
pub mod session;
pub mod speech;

// Convenience re-exports for downstream crates
pub use api::{ApiClient, ApiConfig, Conversation};
pub use audio::{AudioFeed, MicrophoneFeed};
pub use config::RecorderConfig;
pub use error::HeardError;
pub use predict::{PredictionController, PredictionSnapshot, PredictionUpdate};
pub use reconcile::{ReconcileOutcome, TranscriptReconciler, TranscriptSegment};
pub use session::events::{SessionStatus, SessionStatusEvent, TranscriptUpdate};
pub use session::RecordingSession;
pub use speech::events::SpeechEvent;
pub use speech::{SessionConfig, SessionHandle, SpeechSession};

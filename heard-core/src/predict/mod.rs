//! Prediction stream controller.
//!
//! At most one prediction stream is in flight per controller. A start
//! request while one is active is skipped, not queued — the next
//! segment-list change naturally re-triggers it. Stopping (or superseding)
//! a stream bumps a generation counter so callbacks from a stale stream
//! are provably ignored even when the transport cannot be aborted in time.
//!
//! ```text
//! start(id, segments) ──► active? ──yes──► skipped (re-fires later)
//!        │ no
//!        ▼
//!   generation += 1, spawn stream task
//!        │
//!   on_data ──► record text (newest-first, cap 3), broadcast progress
//!   on_complete ──► clear active, broadcast {lastValidText, complete}
//!   on_error ──► clear active, surface message, keep last valid text
//! ```

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::reconcile::TranscriptSegment;

/// Newest-first predictions retained for display.
pub const RECENT_PREDICTIONS_CAP: usize = 3;

/// Broadcast capacity for prediction updates.
const UPDATE_CHANNEL_CAP: usize = 64;

/// Whether an update is an increment, the stream's final word, or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    Progress,
    Complete,
    Error,
}

/// One normalized prediction payload, pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionUpdate {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: PredictionKind,
    pub progressive: bool,
    pub complete: bool,
    pub error: bool,
}

impl PredictionUpdate {
    fn progress(text: String) -> Self {
        Self {
            text,
            kind: PredictionKind::Progress,
            progressive: true,
            complete: false,
            error: false,
        }
    }

    fn complete(text: String) -> Self {
        Self {
            text,
            kind: PredictionKind::Complete,
            progressive: false,
            complete: true,
            error: false,
        }
    }

    fn error(text: String) -> Self {
        Self {
            text,
            kind: PredictionKind::Error,
            progressive: false,
            complete: false,
            error: true,
        }
    }
}

/// Normalize a raw stream payload. The backend writes the accumulated text
/// under `text` (older deployments used `prediction`) plus an optional
/// `complete` flag.
fn normalize(value: &Value) -> PredictionUpdate {
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| value.get("prediction").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    let complete = value
        .get("complete")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if complete {
        PredictionUpdate::complete(text)
    } else {
        PredictionUpdate::progress(text)
    }
}

/// Read-only view of the controller's display state.
#[derive(Debug, Clone, Default)]
pub struct PredictionSnapshot {
    /// Newest-first prediction texts, at most [`RECENT_PREDICTIONS_CAP`].
    pub recent: Vec<String>,
    /// Most recent non-empty prediction, retained across empty/error states
    /// for display continuity.
    pub last_valid: Option<String>,
    /// Last stream error, cleared by the next successful payload.
    pub error: Option<String>,
    /// True while a stream is being consumed.
    pub predicting: bool,
}

#[derive(Debug, Default)]
struct PredictionHistory {
    recent: VecDeque<String>,
    last_valid: Option<String>,
    error: Option<String>,
    predicting: bool,
}

impl PredictionHistory {
    fn record(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.recent.push_front(text.to_string());
        self.recent.truncate(RECENT_PREDICTIONS_CAP);
        self.last_valid = Some(text.to_string());
        self.error = None;
    }

    fn snapshot(&self) -> PredictionSnapshot {
        PredictionSnapshot {
            recent: self.recent.iter().cloned().collect(),
            last_valid: self.last_valid.clone(),
            error: self.error.clone(),
            predicting: self.predicting,
        }
    }

    fn clear(&mut self) {
        self.recent.clear();
        self.last_valid = None;
        self.error = None;
        self.predicting = false;
    }
}

/// Single-flight controller for the conversation prediction stream.
///
/// `PredictionController` is `Send + Sync`; all fields use interior
/// mutability so it can be shared between the session event loop and
/// rendering code.
pub struct PredictionController {
    api: Arc<ApiClient>,
    /// True while a stream is in flight. `swap` on start is the
    /// single-flight gate.
    active: Arc<AtomicBool>,
    /// Bumped by every start and stop; callbacks carrying an older value
    /// are stale and ignored.
    generation: Arc<AtomicU64>,
    history: Arc<Mutex<PredictionHistory>>,
    updates_tx: broadcast::Sender<PredictionUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PredictionController {
    pub fn new(api: Arc<ApiClient>) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAP);
        Self {
            api,
            active: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            history: Arc::new(Mutex::new(PredictionHistory::default())),
            updates_tx,
            task: Mutex::new(None),
        }
    }

    /// Subscribe to live prediction updates.
    pub fn subscribe(&self) -> broadcast::Receiver<PredictionUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PredictionSnapshot {
        self.history.lock().snapshot()
    }

    /// Start a prediction stream for the current transcript.
    ///
    /// Returns `false` without side effects when the segment list is empty
    /// or a stream is already in flight; the caller retries on the next
    /// segment-list change.
    pub fn start(&self, conversation_id: i64, segments: Vec<TranscriptSegment>) -> bool {
        if segments.is_empty() {
            return false;
        }
        if self.active.swap(true, Ordering::SeqCst) {
            debug!(conversation_id, "prediction stream already active; skipping");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.history.lock().predicting = true;
        info!(
            conversation_id,
            segments = segments.len(),
            "starting prediction stream"
        );

        let api = Arc::clone(&self.api);
        let active = Arc::clone(&self.active);
        let generations = Arc::clone(&self.generation);
        let history = Arc::clone(&self.history);
        let updates_tx = self.updates_tx.clone();

        let handle = tokio::spawn(async move {
            let on_data = {
                let active = Arc::clone(&active);
                let generations = Arc::clone(&generations);
                let history = Arc::clone(&history);
                let updates_tx = updates_tx.clone();
                move |value: Value| {
                    if generations.load(Ordering::SeqCst) != generation {
                        debug!("discarding payload from superseded prediction stream");
                        return;
                    }
                    let update = normalize(&value);
                    {
                        let mut history = history.lock();
                        history.record(&update.text);
                        if update.complete {
                            history.predicting = false;
                        }
                    }
                    if update.complete {
                        active.store(false, Ordering::SeqCst);
                    }
                    let _ = updates_tx.send(update);
                }
            };

            let on_error = {
                let active = Arc::clone(&active);
                let generations = Arc::clone(&generations);
                let history = Arc::clone(&history);
                let updates_tx = updates_tx.clone();
                move |err: crate::error::HeardError| {
                    if generations.load(Ordering::SeqCst) != generation {
                        debug!("discarding error from superseded prediction stream");
                        return;
                    }
                    warn!(error = %err, "prediction stream failed");
                    let message = err.to_string();
                    {
                        let mut history = history.lock();
                        history.error = Some(message.clone());
                        history.predicting = false;
                        // last_valid is intentionally retained for display.
                    }
                    active.store(false, Ordering::SeqCst);
                    let _ = updates_tx.send(PredictionUpdate::error(message));
                }
            };

            let on_complete = {
                let active = Arc::clone(&active);
                let generations = Arc::clone(&generations);
                let history = Arc::clone(&history);
                let updates_tx = updates_tx.clone();
                move || {
                    if generations.load(Ordering::SeqCst) != generation {
                        debug!("discarding completion from superseded prediction stream");
                        return;
                    }
                    active.store(false, Ordering::SeqCst);
                    let text = {
                        let mut history = history.lock();
                        history.predicting = false;
                        history.last_valid.clone().unwrap_or_default()
                    };
                    debug!(conversation_id, "prediction stream complete");
                    let _ = updates_tx.send(PredictionUpdate::complete(text));
                }
            };

            api.stream_prediction(conversation_id, &segments, on_data, on_error, on_complete)
                .await;
        });

        *self.task.lock() = Some(handle);
        true
    }

    /// Cancel the in-flight stream, if any. The generation bump guarantees
    /// that a stream the transport could not abort in time cannot overwrite
    /// newer state when it eventually completes.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.history.lock().predicting = false;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Stop the stream and forget all display state. Used when the active
    /// conversation changes or a new recording begins.
    pub fn reset(&self) {
        self.stop();
        self.history.lock().clear();
    }
}

impl std::fmt::Debug for PredictionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionController")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_newest_first_capped_at_three() {
        let mut history = PredictionHistory::default();
        for text in ["a", "b", "c", "d"] {
            history.record(text);
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.recent, vec!["d", "c", "b"]);
        assert_eq!(snapshot.last_valid.as_deref(), Some("d"));
    }

    #[test]
    fn empty_text_is_not_recorded() {
        let mut history = PredictionHistory::default();
        history.record("real");
        history.record("   ");
        assert_eq!(history.snapshot().recent, vec!["real"]);
        assert_eq!(history.snapshot().last_valid.as_deref(), Some("real"));
    }

    #[test]
    fn error_retains_last_valid_and_next_payload_clears_error() {
        let mut history = PredictionHistory::default();
        history.record("kept");
        history.error = Some("connection error".into());

        let snapshot = history.snapshot();
        assert_eq!(snapshot.last_valid.as_deref(), Some("kept"));
        assert!(snapshot.error.is_some());

        history.record("recovered");
        assert!(history.snapshot().error.is_none());
    }

    #[test]
    fn normalize_reads_text_or_prediction_field() {
        let progress = normalize(&serde_json::json!({"text": "soon"}));
        assert_eq!(progress.text, "soon");
        assert_eq!(progress.kind, PredictionKind::Progress);
        assert!(progress.progressive);

        let legacy = normalize(&serde_json::json!({"prediction": "older"}));
        assert_eq!(legacy.text, "older");

        let done = normalize(&serde_json::json!({"text": "final", "complete": true}));
        assert_eq!(done.kind, PredictionKind::Complete);
        assert!(done.complete && !done.progressive);

        let empty = normalize(&serde_json::json!({"unrelated": 1}));
        assert_eq!(empty.text, "");
    }

    #[test]
    fn update_serializes_with_type_tag() {
        let update = PredictionUpdate::complete("done".into());
        let json = serde_json::to_value(&update).expect("serialize update");
        assert_eq!(json["type"], "complete");
        assert_eq!(json["complete"], true);
        assert_eq!(json["error"], false);
    }
}

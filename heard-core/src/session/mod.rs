//! `RecordingSession` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RecordingSession::new()
//!     └─► start()       → token fetched, mic open, speech session started,
//!                         status = Starting → Recording
//!         └─► stop()    → capture + speech session wound down,
//!                         status = Stopping (→ Saving when segments exist) → Idle
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than
//! panicking. Switching the active conversation resets all reconciliation
//! and prediction state and aborts any in-flight prediction stream.
//!
//! ## Threading
//!
//! All engine state mutation happens on one spawned event-loop task, so
//! ordering guarantees derive from event arrival order. The microphone runs
//! on its own blocking thread (cpal streams are `!Send`) and communicates
//! only through the SPSC ring; external collaborators read snapshots
//! through the shared handles, never mutating engine state directly.

pub mod events;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, Conversation};
use crate::audio::{chunker::PcmChunker, create_audio_ring, AudioFeed};
use crate::config::RecorderConfig;
use crate::error::{HeardError, Result};
use crate::predict::PredictionController;
use crate::reconcile::{ReconcileOutcome, TranscriptReconciler, TranscriptSegment};
use crate::speech::{events::SpeechEvent, SessionConfig, SessionHandle};
use events::{SessionStatus, SessionStatusEvent, TranscriptUpdate};

/// Broadcast channel capacity for transcript and status events.
const BROADCAST_CAP: usize = 256;

/// How long the wind-down waits for the service to flush buffered finals.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// The top-level recording controller.
///
/// `RecordingSession` is `Send + Sync` — all fields use interior
/// mutability. Wrap in `Arc` to share between UI state and event-forwarding
/// tasks.
pub struct RecordingSession {
    config: RecorderConfig,
    api: Arc<ApiClient>,
    speech: SessionHandle,
    feed: Arc<Mutex<Box<dyn AudioFeed>>>,
    predictions: Arc<PredictionController>,
    reconciler: Arc<Mutex<TranscriptReconciler>>,
    conversation_id: Arc<Mutex<Option<i64>>>,
    /// `true` while capture + event loop are active.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    update_tx: broadcast::Sender<TranscriptUpdate>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    /// Wakes the event loop on user-initiated stop.
    shutdown: Arc<Notify>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingSession {
    /// Create a session. Does not touch the microphone — call
    /// [`start`](Self::start).
    pub fn new(
        config: RecorderConfig,
        api: Arc<ApiClient>,
        speech: SessionHandle,
        feed: Box<dyn AudioFeed>,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let reconciler = TranscriptReconciler::new(config.translation_enabled());

        Self {
            predictions: Arc::new(PredictionController::new(Arc::clone(&api))),
            config,
            api,
            speech,
            feed: Arc::new(Mutex::new(feed)),
            reconciler: Arc::new(Mutex::new(reconciler)),
            conversation_id: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            update_tx,
            status_tx,
            shutdown: Arc::new(Notify::new()),
            event_task: Mutex::new(None),
        }
    }

    /// Begin recording: fetch a speech-session token, open the microphone,
    /// start the speech session, and spawn the event loop.
    ///
    /// Reconciliation and prediction state start fresh. Returns once the
    /// microphone is confirmed open and the session accepted its
    /// configuration.
    ///
    /// # Errors
    /// - `HeardError::AlreadyRecording` if already started.
    /// - `HeardError::TokenFetch` / audio / session errors on setup failure;
    ///   the session returns to `Idle` and no segments are created.
    pub async fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(HeardError::AlreadyRecording);
        }

        self.set_status(SessionStatus::Starting, None);

        let token = match self.api.fetch_speech_token().await {
            Ok(token) => token,
            Err(e) => return Err(self.fail_start(e)),
        };

        // Fresh per-recording state.
        {
            let mut reconciler = self.reconciler.lock();
            reconciler.reset();
            reconciler.set_translation_enabled(self.config.translation_enabled());
        }
        self.predictions.reset();

        self.running.store(true, Ordering::SeqCst);

        // ── Microphone, on its own blocking thread ───────────────────────
        let (producer, consumer) = create_audio_ring();
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let feed = Arc::clone(&self.feed);
            let running = Arc::clone(&self.running);
            tokio::task::spawn_blocking(move || {
                feed.lock().run(producer, running, ready_tx);
            });
        }

        let capture_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(self.fail_start(e)),
            Err(_) => {
                return Err(self.fail_start(HeardError::AudioStream(
                    "audio feed exited before reporting ready".into(),
                )))
            }
        };

        let chunker = match PcmChunker::new(consumer, capture_rate, self.config.target_sample_rate)
        {
            Ok(chunker) => chunker,
            Err(e) => return Err(self.fail_start(e)),
        };

        // ── Speech session ───────────────────────────────────────────────
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session_config = SessionConfig::from_recorder(&self.config);
        if let Err(e) = self.speech.0.lock().start(&token, &session_config, events_tx) {
            return Err(self.fail_start(e));
        }

        self.set_status(SessionStatus::Recording, None);
        let conversation_id = *self.conversation_id.lock();
        info!(conversation_id = ?conversation_id, capture_rate, "recording started");

        let ctx = SessionContext {
            config: self.config.clone(),
            api: Arc::clone(&self.api),
            speech: self.speech.clone(),
            predictions: Arc::clone(&self.predictions),
            reconciler: Arc::clone(&self.reconciler),
            conversation_id,
            running: Arc::clone(&self.running),
            status: Arc::clone(&self.status),
            update_tx: self.update_tx.clone(),
            status_tx: self.status_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };
        *self.event_task.lock() = Some(tokio::spawn(run_event_loop(ctx, events_rx, chunker)));

        Ok(())
    }

    /// Request stop. The event loop winds down capture and the speech
    /// session, persists segments when any exist, and returns to `Idle`.
    ///
    /// # Errors
    /// `HeardError::NotRecording` if no recording is in progress.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(HeardError::NotRecording);
        }
        info!("stop requested");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        Ok(())
    }

    /// Wait for the event loop — including the save phase — to finish.
    pub async fn join(&self) {
        let task = self.event_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Make `conversation` the active conversation.
    ///
    /// Stops any in-flight recording, aborts the prediction stream, resets
    /// all reconciliation state, and seeds the loaded transcript (segment
    /// ids continue past the highest loaded id).
    pub async fn set_conversation(&self, conversation: Option<&Conversation>) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.stop();
            self.join().await;
        }

        self.predictions.reset();
        *self.conversation_id.lock() = conversation.map(|c| c.id);

        let mut reconciler = self.reconciler.lock();
        reconciler.reset();
        if let Some(conversation) = conversation {
            if !conversation.transcript.is_empty() {
                reconciler.seed(conversation.transcript.clone());
            }
        }
        debug!(conversation_id = ?conversation.map(|c| c.id), "active conversation switched");
    }

    // ── Read-side surfaces ───────────────────────────────────────────────

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn is_recording(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn conversation_id(&self) -> Option<i64> {
        *self.conversation_id.lock()
    }

    /// Owned copy of the current segment list.
    pub fn segments(&self) -> Vec<TranscriptSegment> {
        self.reconciler.lock().snapshot()
    }

    pub fn partial_transcript(&self) -> String {
        self.reconciler.lock().partial_transcript().to_string()
    }

    pub fn partial_translation(&self) -> String {
        self.reconciler.lock().partial_translation().to_string()
    }

    /// Subscribe to transcript updates (segments + live partials).
    pub fn subscribe_updates(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.update_tx.subscribe()
    }

    /// Subscribe to session status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// The session's prediction controller.
    pub fn predictions(&self) -> &PredictionController {
        &self.predictions
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }

    /// Unwind a failed start: back to `Idle`, error surfaced, no segments.
    fn fail_start(&self, error: HeardError) -> HeardError {
        warn!(error = %error, "failed to start recording");
        self.running.store(false, Ordering::SeqCst);
        self.set_status(SessionStatus::Idle, Some(error.to_string()));
        error
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("status", &self.status())
            .field("conversation_id", &self.conversation_id())
            .finish_non_exhaustive()
    }
}

/// Everything the event loop needs, captured at start.
struct SessionContext {
    config: RecorderConfig,
    api: Arc<ApiClient>,
    speech: SessionHandle,
    predictions: Arc<PredictionController>,
    reconciler: Arc<Mutex<TranscriptReconciler>>,
    conversation_id: Option<i64>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    update_tx: broadcast::Sender<TranscriptUpdate>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    shutdown: Arc<Notify>,
}

impl SessionContext {
    fn set_status(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}

/// One logical thread of execution per recording: speech events, audio
/// ticks, and shutdown are multiplexed here, so all reconciliation-state
/// mutation is serialized by arrival order.
async fn run_event_loop(
    ctx: SessionContext,
    mut events: mpsc::UnboundedReceiver<SpeechEvent>,
    mut chunker: PcmChunker,
) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.chunk_interval_ms.max(10)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        if !handle_event(&ctx, &event) {
                            break;
                        }
                    }
                    None => {
                        debug!("speech event channel closed");
                        break;
                    }
                }
            }
            _ = ctx.shutdown.notified() => break,
            _ = interval.tick() => {
                if !ctx.running.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(pcm) = chunker.drain() {
                    if let Err(e) = ctx.speech.0.lock().send_audio(&pcm) {
                        warn!(error = %e, "failed to forward audio chunk");
                    }
                }
            }
        }
    }

    finalize(&ctx, &mut events).await;
}

/// Apply one speech event and broadcast what changed. Returns `false` when
/// the session should wind down.
fn handle_event(ctx: &SessionContext, event: &SpeechEvent) -> bool {
    let outcome = ctx.reconciler.lock().apply(event);

    match outcome {
        ReconcileOutcome::Unchanged => true,
        ReconcileOutcome::PartialTranscript => {
            let text = ctx.reconciler.lock().partial_transcript().to_string();
            let _ = ctx.update_tx.send(TranscriptUpdate::PartialTranscript { text });
            true
        }
        ReconcileOutcome::PartialTranslation => {
            broadcast_partial_translation(ctx);
            true
        }
        ReconcileOutcome::SegmentsChanged => {
            let (segments, partial) = {
                let reconciler = ctx.reconciler.lock();
                (
                    reconciler.snapshot(),
                    reconciler.partial_transcript().to_string(),
                )
            };
            let _ = ctx.update_tx.send(TranscriptUpdate::Segments {
                segments: segments.clone(),
            });
            let _ = ctx
                .update_tx
                .send(TranscriptUpdate::PartialTranscript { text: partial });
            broadcast_partial_translation(ctx);

            // Each stable update re-arms the prediction stream; the
            // controller itself enforces single-flight.
            if ctx.running.load(Ordering::SeqCst) {
                if let Some(id) = ctx.conversation_id {
                    ctx.predictions.start(id, segments);
                }
            }
            true
        }
        ReconcileOutcome::EndOfStream => {
            info!("end of transcript received");
            false
        }
        ReconcileOutcome::SessionError(message) => {
            error!(message = %message, "speech session error");
            ctx.set_status(
                SessionStatus::Stopping,
                Some(format!("Transcription error: {message}")),
            );
            false
        }
    }
}

fn broadcast_partial_translation(ctx: &SessionContext) {
    let (speaker, text) = {
        let reconciler = ctx.reconciler.lock();
        (
            reconciler
                .partial_translation_speaker()
                .unwrap_or_default()
                .to_string(),
            reconciler.partial_translation().to_string(),
        )
    };
    let _ = ctx
        .update_tx
        .send(TranscriptUpdate::PartialTranslation { speaker, text });
}

/// Wind down: stop capture and the speech session (best-effort), drain
/// already-flushed finals, persist, return to `Idle`.
async fn finalize(ctx: &SessionContext, events: &mut mpsc::UnboundedReceiver<SpeechEvent>) {
    if *ctx.status.lock() != SessionStatus::Stopping {
        ctx.set_status(SessionStatus::Stopping, None);
    }
    ctx.running.store(false, Ordering::SeqCst);

    if let Err(e) = ctx.speech.0.lock().stop() {
        warn!(error = %e, "error stopping speech session; continuing cleanup");
    }
    ctx.predictions.stop();

    // The service may still flush buffered finals; fold them in briefly so
    // the tail of the conversation is not lost.
    loop {
        match tokio::time::timeout(STOP_DRAIN_TIMEOUT, events.recv()).await {
            Ok(Some(event)) => {
                handle_event(ctx, &event);
            }
            Ok(None) | Err(_) => break,
        }
    }

    let snapshot = ctx.reconciler.lock().snapshot();
    let mut idle_detail = None;
    if !snapshot.is_empty() {
        match ctx.conversation_id {
            Some(id) => {
                ctx.set_status(SessionStatus::Saving, None);
                match ctx.api.update_transcript(id, &snapshot).await {
                    Ok(_) => {
                        info!(conversation_id = id, segments = snapshot.len(), "transcript saved")
                    }
                    Err(e) => {
                        // In-memory segments survive so the caller can retry.
                        error!(error = %e, "failed to save transcript");
                        idle_detail = Some(format!("Failed to save transcript: {e}"));
                    }
                }
            }
            None => warn!("no conversation selected; transcript not persisted"),
        }
    }

    ctx.set_status(SessionStatus::Idle, idle_detail);
    info!("recording session wound down");
}

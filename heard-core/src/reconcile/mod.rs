//! Transcript reconciliation engine.
//!
//! ## Event flow
//!
//! ```text
//! SpeechEvent::AddPartialTranscript ──► replace live partial text
//! SpeechEvent::AddTranscript ─────────► merge/append speaker segments,
//!                                       enqueue pending translation ids
//! SpeechEvent::AddPartialTranslation ─► replace live partial translation
//! SpeechEvent::AddTranslation ────────► dedup → FIFO match → append to
//!                                       segment.translations
//! SpeechEvent::EndOfTranscript ───────► signal session stop
//! SpeechEvent::Error ─────────────────► displayable error + session stop
//! ```
//!
//! Segments are append-only: a new segment is created only when the speaker
//! differs from the last segment's speaker; otherwise the text is merged
//! into the last segment. Nothing is reordered or deleted except by
//! [`TranscriptReconciler::reset`].
//!
//! Translation matching is FIFO per speaker: each new segment (while
//! translation is enabled) enqueues its id; each accepted final translation
//! pops the oldest pending id for its speaker, falling back to the
//! speaker's most recent segment when the queue is empty.

pub mod dedup;
pub mod text;

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::speech::events::{RecognitionResult, SpeechEvent, TranslationResult, UNKNOWN_SPEAKER};
use dedup::TranslationDedup;
use text::{join_content, merge_text};

/// One contiguous speaker turn of finalized transcript text plus its
/// translations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Unique within a session, assigned at creation, never reused.
    pub id: u64,
    /// Diarization label; `"UU"` denotes an unknown speaker.
    pub speaker: String,
    /// Finalized utterance text for this turn.
    pub text: String,
    /// Translations appended as they arrive, in arrival order.
    #[serde(default)]
    pub translations: Vec<String>,
    /// Creation time, epoch milliseconds. Non-decreasing across the list.
    pub timestamp: i64,
}

impl TranscriptSegment {
    /// Human-readable speaker name for display layers.
    pub fn speaker_name(&self) -> String {
        if self.speaker == UNKNOWN_SPEAKER {
            return "Unknown Speaker".into();
        }
        let digits: String = self.speaker.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            self.speaker.clone()
        } else {
            format!("Speaker {digits}")
        }
    }
}

/// What a [`TranscriptReconciler::apply`] call changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Nothing observable changed (e.g. duplicate translation dropped).
    Unchanged,
    /// The live partial-transcript display value was replaced or cleared.
    PartialTranscript,
    /// The live partial-translation display value was replaced or cleared.
    PartialTranslation,
    /// The segment list changed (segment appended, merged, or translated).
    SegmentsChanged,
    /// The service signalled end-of-stream; the session should stop.
    EndOfStream,
    /// The service reported a fatal error; the session should stop.
    SessionError(String),
}

/// All per-recording reconciliation state, owned by one session's event
/// loop. Created fresh at recording start; discarded by [`reset`](Self::reset)
/// when the active conversation changes.
#[derive(Debug)]
pub struct TranscriptReconciler {
    segments: Vec<TranscriptSegment>,
    next_segment_id: u64,
    partial_transcript: String,
    partial_translation: String,
    partial_translation_speaker: Option<String>,
    /// speaker → segment ids awaiting a translation, oldest first.
    pending: HashMap<String, VecDeque<u64>>,
    dedup: TranslationDedup,
    translation_enabled: bool,
}

impl TranscriptReconciler {
    pub fn new(translation_enabled: bool) -> Self {
        Self {
            segments: Vec::new(),
            next_segment_id: 1,
            partial_transcript: String::new(),
            partial_translation: String::new(),
            partial_translation_speaker: None,
            pending: HashMap::new(),
            dedup: TranslationDedup::new(),
            translation_enabled,
        }
    }

    /// Load an existing conversation transcript. Segment ids continue from
    /// one past the highest loaded id.
    pub fn seed(&mut self, segments: Vec<TranscriptSegment>) {
        self.next_segment_id = segments.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        self.segments = segments;
    }

    /// Discard all reconciliation state. Used when a recording starts or
    /// the active conversation changes.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.next_segment_id = 1;
        self.partial_transcript.clear();
        self.partial_translation.clear();
        self.partial_translation_speaker = None;
        self.pending.clear();
        self.dedup.clear();
    }

    pub fn set_translation_enabled(&mut self, enabled: bool) {
        self.translation_enabled = enabled;
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    /// Owned copy of the segment list, for rendering or persistence.
    pub fn snapshot(&self) -> Vec<TranscriptSegment> {
        self.segments.clone()
    }

    pub fn partial_transcript(&self) -> &str {
        &self.partial_transcript
    }

    pub fn partial_translation(&self) -> &str {
        &self.partial_translation
    }

    pub fn partial_translation_speaker(&self) -> Option<&str> {
        self.partial_translation_speaker.as_deref()
    }

    /// Apply one speech event using the current time.
    pub fn apply(&mut self, event: &SpeechEvent) -> ReconcileOutcome {
        self.apply_at(
            event,
            Instant::now(),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Apply one speech event at an explicit time. `now` drives the
    /// translation dedup window; `wall_ms` stamps new segments.
    pub fn apply_at(
        &mut self,
        event: &SpeechEvent,
        now: Instant,
        wall_ms: i64,
    ) -> ReconcileOutcome {
        match event {
            SpeechEvent::AddPartialTranscript { results } => {
                self.partial_transcript = join_content(results.iter().map(|r| r.content()));
                ReconcileOutcome::PartialTranscript
            }
            SpeechEvent::AddTranscript { results } => {
                let changed = self.apply_final_transcript(results, wall_ms);
                self.partial_transcript.clear();
                if changed {
                    ReconcileOutcome::SegmentsChanged
                } else {
                    ReconcileOutcome::PartialTranscript
                }
            }
            SpeechEvent::AddPartialTranslation { results } => {
                self.partial_translation = join_content(results.iter().map(|r| r.content.as_str()));
                self.partial_translation_speaker = results
                    .first()
                    .map(|r| r.speaker().to_string())
                    .or(Some(UNKNOWN_SPEAKER.to_string()));
                ReconcileOutcome::PartialTranslation
            }
            SpeechEvent::AddTranslation { results } => self.apply_final_translation(results, now),
            SpeechEvent::EndOfTranscript => ReconcileOutcome::EndOfStream,
            SpeechEvent::Error { kind, reason } => ReconcileOutcome::SessionError(format!(
                "{kind}: {}",
                reason.as_deref().unwrap_or("Unknown error")
            )),
        }
    }

    // ── Final transcript handling ────────────────────────────────────────

    /// Apply the speaker runs of one final transcript event. Returns `true`
    /// when the segment list changed.
    fn apply_final_transcript(&mut self, results: &[RecognitionResult], wall_ms: i64) -> bool {
        let mut changed = false;
        for (speaker, cleaned) in speaker_runs(results) {
            self.append_run(speaker, cleaned, wall_ms);
            changed = true;
        }
        changed
    }

    /// Merge one cleaned run into the last segment (same speaker) or append
    /// a new segment (speaker change).
    fn append_run(&mut self, speaker: String, cleaned: String, wall_ms: i64) {
        if let Some(last) = self.segments.last_mut() {
            if last.speaker == speaker {
                last.text = merge_text(&last.text, &cleaned);
                return;
            }
        }

        let id = self.next_segment_id;
        self.next_segment_id += 1;

        // Wall clocks can step backwards; the list stays non-decreasing.
        let timestamp = self
            .segments
            .last()
            .map(|s| s.timestamp.max(wall_ms))
            .unwrap_or(wall_ms);

        if self.translation_enabled {
            self.pending.entry(speaker.clone()).or_default().push_back(id);
        }

        debug!(id, speaker = %speaker, "new transcript segment");
        self.segments.push(TranscriptSegment {
            id,
            speaker,
            text: cleaned,
            translations: Vec::new(),
            timestamp,
        });
    }

    // ── Final translation handling ───────────────────────────────────────

    fn apply_final_translation(
        &mut self,
        results: &[TranslationResult],
        now: Instant,
    ) -> ReconcileOutcome {
        let speaker = results
            .first()
            .map(|r| r.speaker().to_string())
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());

        let normalized = join_plain(results);
        if !self.dedup.should_process(&speaker, &normalized, now) {
            return ReconcileOutcome::Unchanged;
        }

        let cleaned = join_content(results.iter().map(|r| r.content.as_str()));
        let appended = if cleaned.is_empty() {
            debug!(speaker = %speaker, "ignoring empty translation");
            false
        } else {
            self.attach_translation(&speaker, cleaned)
        };

        // A final translation supersedes the partial display for its speaker.
        let partial_cleared = self.partial_translation_speaker.as_deref() == Some(speaker.as_str());
        if partial_cleared {
            self.partial_translation.clear();
            self.partial_translation_speaker = None;
        }

        if appended {
            ReconcileOutcome::SegmentsChanged
        } else if partial_cleared {
            ReconcileOutcome::PartialTranslation
        } else {
            ReconcileOutcome::Unchanged
        }
    }

    /// FIFO match against the speaker's pending queue, falling back to the
    /// speaker's most recently created segment. Never creates a segment.
    fn attach_translation(&mut self, speaker: &str, translation: String) -> bool {
        let matched_id = self
            .pending
            .get_mut(speaker)
            .and_then(|queue| queue.pop_front());

        let target = match matched_id {
            Some(id) => self.segments.iter_mut().find(|s| s.id == id),
            None => self
                .segments
                .iter_mut()
                .rev()
                .find(|s| s.speaker == speaker),
        };

        match target {
            Some(segment) => {
                debug!(
                    segment_id = segment.id,
                    speaker,
                    matched = matched_id.is_some(),
                    "translation attached"
                );
                segment.translations.push(translation);
                true
            }
            None => {
                debug!(speaker, "translation arrived before any segment; dropped");
                false
            }
        }
    }
}

/// Group diarized results into consecutive same-speaker runs of cleaned
/// display text. Diarization may return several speaker spans per event.
fn speaker_runs(results: &[RecognitionResult]) -> Vec<(String, String)> {
    let mut runs: Vec<(String, Vec<&str>)> = Vec::new();
    for result in results {
        let content = result.content();
        if content.is_empty() {
            continue;
        }
        let speaker = result.speaker();
        match runs.last_mut() {
            Some((current, pieces)) if current.as_str() == speaker => pieces.push(content),
            _ => runs.push((speaker.to_string(), vec![content])),
        }
    }

    runs.into_iter()
        .map(|(speaker, pieces)| (speaker, join_content(pieces)))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

/// Plain space-joined content, used as the dedup key (no punctuation
/// normalization — the key must match exactly what the service re-emits).
fn join_plain(results: &[TranslationResult]) -> String {
    results
        .iter()
        .map(|r| r.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

//! Duplicate-translation suppression.
//!
//! The realtime service occasionally re-emits a final translation it has
//! already delivered. A `(speaker, normalized content)` key observed again
//! within [`DEDUP_WINDOW`] is rejected before any segment matching happens.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

/// Re-emissions of the same translation within this window are dropped.
pub const DEDUP_WINDOW: Duration = Duration::from_millis(5_000);

/// Number of accepted translations retained for diagnostics.
pub const RECENT_HISTORY_CAP: usize = 10;

/// One accepted translation, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct RecentTranslation {
    pub speaker: String,
    pub content: String,
    pub seen_at: Instant,
}

/// Sliding-window duplicate filter for final translation events.
#[derive(Debug, Default)]
pub struct TranslationDedup {
    /// `speaker:content` → last time this exact translation was accepted.
    seen: HashMap<String, Instant>,
    /// Most recent distinct translations, oldest first.
    recent: VecDeque<RecentTranslation>,
}

impl TranslationDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a final translation should be processed.
    ///
    /// Accepting records `now` as the last-seen time for the key, so a
    /// duplicate arriving after the window re-opens the window.
    pub fn should_process(&mut self, speaker: &str, content: &str, now: Instant) -> bool {
        let key = format!("{speaker}:{content}");

        if let Some(last_seen) = self.seen.get(&key) {
            if now.saturating_duration_since(*last_seen) < DEDUP_WINDOW {
                debug!(speaker, content, "dropping duplicate translation");
                return false;
            }
        }

        self.seen.insert(key, now);
        self.recent.push_back(RecentTranslation {
            speaker: speaker.to_string(),
            content: content.to_string(),
            seen_at: now,
        });
        if self.recent.len() > RECENT_HISTORY_CAP {
            self.recent.pop_front();
        }
        true
    }

    /// Recently accepted translations, oldest first.
    pub fn recent(&self) -> &VecDeque<RecentTranslation> {
        &self.recent
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.recent.clear();
    }
}

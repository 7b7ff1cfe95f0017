//! Engine configuration.

/// Configuration for a [`RecordingSession`](crate::session::RecordingSession).
///
/// Defaults match the production deployment: diarized English transcription
/// at the `enhanced` operating point, partials on, no translation.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// BCP-47-ish language code sent to the realtime service. Default: `"en"`.
    pub source_language: String,
    /// Translation target language. `None` disables translation entirely —
    /// no `translation_config` is sent and no pending-translation tracking
    /// happens.
    pub target_language: Option<String>,
    /// Realtime service operating point. Default: `"enhanced"`.
    pub operating_point: String,
    /// Upper bound passed to speaker diarization. Default: 10.
    pub max_speakers: u32,
    /// Whether the service should emit partial (provisional) results.
    pub enable_partials: bool,
    /// Interval at which captured audio is drained and forwarded to the
    /// speech session, in milliseconds. Default: 100.
    pub chunk_interval_ms: u64,
    /// Sample rate of the PCM delivered to the speech session (Hz).
    /// Audio captured at other rates is resampled. Default: 16000.
    pub target_sample_rate: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source_language: "en".into(),
            target_language: None,
            operating_point: "enhanced".into(),
            max_speakers: 10,
            enable_partials: true,
            chunk_interval_ms: 100,
            target_sample_rate: 16_000,
        }
    }
}

impl RecorderConfig {
    /// True when a translation target is configured for this session.
    pub fn translation_enabled(&self) -> bool {
        self.target_language.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_follows_target_language() {
        let mut cfg = RecorderConfig::default();
        assert!(!cfg.translation_enabled());
        cfg.target_language = Some("es".into());
        assert!(cfg.translation_enabled());
    }
}

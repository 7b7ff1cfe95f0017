//! Sample-rate conversion between the capture device and the realtime
//! service.
//!
//! Devices commonly capture at 44.1/48 kHz while the session config
//! declares 16 kHz PCM. `RateConverter` bridges the gap on the session's
//! event-loop side, where allocation is allowed. When the rates already
//! match it is a passthrough and no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{HeardError, Result};

/// Input frame count handed to rubato per process call.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full chunk is available.
    pending: Vec<f32>,
    /// Pre-allocated `[1][output_frames_max]` output buffer.
    output: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `HeardError::AudioDevice` if rubato rejects the ratio.
    pub fn new(capture_rate: u32, target_rate: u32) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                output: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            1, // mono
        )
        .map_err(|e| HeardError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(capture_rate, target_rate, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            output: vec![vec![0f32; max_out]],
        })
    }

    /// Feed captured samples, returning whatever full chunks convert to.
    /// A sub-chunk remainder is held for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut converted = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK {
            let chunk = &self.pending[..RESAMPLE_CHUNK];
            match resampler.process_into_buffer(&[chunk], &mut self.output, None) {
                Ok((_consumed, produced)) => {
                    converted.extend_from_slice(&self.output[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..RESAMPLE_CHUNK);
        }
        converted
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

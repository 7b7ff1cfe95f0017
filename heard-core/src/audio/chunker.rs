//! Fixed-interval PCM chunk assembly.
//!
//! The session event loop ticks every `chunk_interval_ms`, drains whatever
//! the capture callback pushed into the ring, converts it to the service
//! rate, and encodes 16-bit little-endian PCM for the speech session.

use crate::audio::{AudioConsumer, Consumer};
use crate::audio::resample::RateConverter;
use crate::error::Result;

/// Scratch size for one ring drain pass.
const DRAIN_CHUNK: usize = 4096;

/// Drains the capture ring into service-rate PCM byte chunks.
pub struct PcmChunker {
    consumer: AudioConsumer,
    converter: RateConverter,
    scratch: Vec<f32>,
}

impl PcmChunker {
    pub fn new(consumer: AudioConsumer, capture_rate: u32, target_rate: u32) -> Result<Self> {
        Ok(Self {
            consumer,
            converter: RateConverter::new(capture_rate, target_rate)?,
            scratch: vec![0f32; DRAIN_CHUNK],
        })
    }

    /// Drain everything currently buffered. Returns `None` when no full
    /// converted samples are available yet.
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        let mut samples: Vec<f32> = Vec::new();
        loop {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            samples.extend(self.converter.process(&self.scratch[..n]));
        }

        if samples.is_empty() {
            None
        } else {
            Some(encode_i16_le(&samples))
        }
    }
}

/// Encode f32 samples in [-1.0, 1.0] as 16-bit little-endian PCM.
pub fn encode_i16_le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{create_audio_ring, Producer};

    #[test]
    fn drain_returns_all_buffered_samples_as_pcm_bytes() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&[0.0f32, 0.5, -0.5]);

        let mut chunker = PcmChunker::new(consumer, 16_000, 16_000).unwrap();
        let bytes = chunker.drain().expect("buffered samples");
        assert_eq!(bytes.len(), 6);

        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        let second = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(first, 0);
        assert_eq!(second, (0.5 * i16::MAX as f32) as i16);
    }

    #[test]
    fn drain_on_empty_ring_yields_none() {
        let (_producer, consumer) = create_audio_ring();
        let mut chunker = PcmChunker::new(consumer, 16_000, 16_000).unwrap();
        assert!(chunker.drain().is_none());
    }

    #[test]
    fn encoding_clamps_out_of_range_samples() {
        let bytes = encode_i16_le(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }
}

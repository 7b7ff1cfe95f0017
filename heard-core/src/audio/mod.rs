//! Microphone capture.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate after warm-up, block on a lock, or perform I/O.
//! The callback therefore only downmixes to mono and writes into an SPSC
//! ring buffer whose `push_slice` is wait-free; the session's event loop
//! drains the ring on its chunk interval.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). [`AudioFeed::run`] executes entirely on one dedicated blocking
//! thread so the stream is created and dropped without ever crossing a
//! thread boundary.

pub mod chunker;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ringbuf::{traits::Split, HeapRb};
use tokio::sync::oneshot;

pub use ringbuf::traits::{Consumer, Producer};

use crate::error::Result;

#[cfg(feature = "audio-cpal")]
use crate::error::HeardError;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the session event loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^21 f32 samples ≈ 43.7 s at 48 kHz. Generous headroom
/// over the 100 ms drain cadence so a stalled loop never drops audio.
pub const RING_CAPACITY: usize = 1 << 21;

/// Create a matched producer/consumer pair backed by a heap ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// A microphone (or substitute) powering one recording.
///
/// Implementations run for the lifetime of a recording on a dedicated
/// blocking thread: open the device, report the capture sample rate (or the
/// open error) through `ready`, then keep pushing mono f32 samples into
/// `producer` until `running` clears.
pub trait AudioFeed: Send + 'static {
    fn run(
        &mut self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    );
}

/// System microphone capture via cpal.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneFeed {
    preferred_device: Option<String>,
}

impl MicrophoneFeed {
    /// Capture from the default input device.
    pub fn system_default() -> Self {
        Self::default()
    }

    /// Prefer a named input device, falling back to the default when the
    /// name is not found.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
        }
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioFeed for MicrophoneFeed {
    fn run(
        &mut self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    ) {
        match open_input_stream(self.preferred_device.as_deref(), producer, Arc::clone(&running)) {
            Ok((stream, sample_rate)) => {
                let _ = ready.send(Ok(sample_rate));
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(std::time::Duration::from_millis(25));
                }
                // Dropped here, on the thread that created it.
                drop(stream);
                info!("microphone capture stopped");
            }
            Err(e) => {
                let _ = ready.send(Err(e));
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioFeed for MicrophoneFeed {
    fn run(
        &mut self,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<u32>>,
    ) {
        let _ = ready.send(Err(crate::error::HeardError::AudioStream(
            "compiled without audio-cpal feature".into(),
        )));
    }
}

#[cfg(feature = "audio-cpal")]
fn open_input_stream(
    preferred_device: Option<&str>,
    producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;

    let host = cpal::default_host();

    let mut device = None;
    if let Some(name) = preferred_device {
        match host.input_devices() {
            Ok(mut devices) => {
                device = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if device.is_none() {
                    warn!("preferred input device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }
    let device = match device.or_else(|| host.default_input_device()) {
        Some(d) => d,
        None => return Err(HeardError::NoDefaultInputDevice),
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| HeardError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    info!(sample_rate, channels, "audio config selected");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, running, |s| s),
        SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, producer, running, |s| {
                s as f32 / 32_768.0
            })
        }
        SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, producer, running, |s| {
                (s as f32 - 32_768.0) / 32_768.0
            })
        }
        fmt => {
            return Err(HeardError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| HeardError::AudioStream(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Build an input stream whose callback downmixes to mono f32 and writes
/// into the ring producer.
#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    use cpal::traits::DeviceTrait;

    let channels = config.channels as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }

                mix_buf.clear();
                if channels <= 1 {
                    mix_buf.extend(data.iter().map(|s| convert(*s)));
                } else {
                    for frame in data.chunks_exact(channels) {
                        let sum: f32 = frame.iter().map(|s| convert(*s)).sum();
                        mix_buf.push(sum / channels as f32);
                    }
                }

                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!(
                        "ring buffer full: dropped {} frames",
                        mix_buf.len() - written
                    );
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| HeardError::AudioStream(e.to_string()))
}

//! Microphone (and optional video-frame) capture.
//!
//! The realtime input callback only downmixes and hands raw samples to a
//! channel; chunking, resampling to the uplink rate, and base64 encoding all
//! happen on a tokio task so the audio thread never blocks.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{self, UPLINK_SAMPLE_RATE};
use gemini_live::audio::{encode_f32, level_of};

/// Samples per uplink chunk, fixed so the resampler runs with a constant
/// input size.
pub const CAPTURE_CHUNK_SIZE: usize = 1024;

/// Poll interval for the optional frame source.
pub const VIDEO_FRAME_INTERVAL: Duration = Duration::from_secs(1);

const RAW_QUEUE_CAPACITY: usize = 1024;
const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to read device configuration: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build input stream: {0}")]
    Stream(#[from] cpal::BuildStreamError),
    #[error("failed to start input stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("failed to create capture resampler: {0}")]
    Resampler(#[from] rubato::ResamplerConstructionError),
    #[error("failed to query device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),
}

/// One unit of captured media, already encoded for the wire.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    AudioChunk {
        /// Base64 PCM16 at the uplink rate.
        data: String,
        /// Perceptual level of the chunk, 0 to 100.
        level: f32,
    },
    VideoFrame {
        /// Base64 JPEG.
        data: String,
    },
}

impl CaptureEvent {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio/pcm;rate=16000",
            Self::VideoFrame { .. } => "image/jpeg",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            Self::AudioChunk { data, .. } => data,
            Self::VideoFrame { data } => data,
        }
    }
}

/// Source of already-encoded video frames, polled once per interval. `None`
/// means no frame is available right now.
pub trait FrameSource: Send + Sync {
    fn next_frame(&self) -> Option<String>;
}

/// Running capture pipeline. The stream stops when this is dropped.
pub struct MediaCapture {
    pub events: mpsc::Receiver<CaptureEvent>,
    _stream: cpal::Stream,
}

impl MediaCapture {
    /// Opens the device with a fixed buffer size, starts the stream, and
    /// spawns the chunking task. Must be called from within a tokio runtime.
    pub fn start(
        device: &cpal::Device,
        frames: Option<Arc<dyn FrameSource>>,
    ) -> Result<Self, CaptureError> {
        let default_config = device.default_input_config()?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(CAPTURE_CHUNK_SIZE as u32)),
        };
        let channel_count = config.channels as usize;
        let device_rate = config.sample_rate.0 as f64;
        tracing::info!(
            device = %device.name()?,
            rate = device_rate,
            channels = channel_count,
            "starting capture"
        );

        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>(RAW_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<CaptureEvent>(EVENT_QUEUE_CAPACITY);

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = audio::downmix_to_mono(data, channel_count);
                if let Err(e) = raw_tx.try_send(mono) {
                    tracing::warn!(error = %e, "capture queue full; samples dropped");
                }
            },
            move |err| tracing::error!(error = %err, "input stream error"),
            None,
        )?;
        stream.play()?;

        let resampler = audio::create_resampler(device_rate, UPLINK_SAMPLE_RATE, CAPTURE_CHUNK_SIZE)?;
        tokio::spawn(pump(raw_rx, event_tx, resampler, frames));

        Ok(Self {
            events: event_rx,
            _stream: stream,
        })
    }
}

async fn pump(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    event_tx: mpsc::Sender<CaptureEvent>,
    mut resampler: impl Resampler<f32>,
    frames: Option<Arc<dyn FrameSource>>,
) {
    let mut buffer: VecDeque<f32> = VecDeque::with_capacity(CAPTURE_CHUNK_SIZE * 2);
    let mut frame_timer = tokio::time::interval(VIDEO_FRAME_INTERVAL);
    frame_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            raw = raw_rx.recv() => {
                let Some(raw) = raw else {
                    tracing::debug!("capture stream gone; pump stopping");
                    return;
                };
                buffer.extend(raw);
                while buffer.len() >= CAPTURE_CHUNK_SIZE {
                    let chunk: Vec<f32> = buffer.drain(..CAPTURE_CHUNK_SIZE).collect();
                    let resampled = match resampler.process(&[chunk.as_slice()], None) {
                        Ok(mut out) => out.remove(0),
                        Err(e) => {
                            tracing::warn!(error = %e, "capture resample failed; chunk dropped");
                            continue;
                        }
                    };
                    if resampled.is_empty() {
                        continue;
                    }
                    let event = CaptureEvent::AudioChunk {
                        data: encode_f32(&resampled),
                        level: level_of(&resampled),
                    };
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            _ = frame_timer.tick(), if frames.is_some() => {
                if let Some(source) = frames.as_ref() {
                    if let Some(data) = source.next_frame() {
                        if event_tx.send(CaptureEvent::VideoFrame { data }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pump_emits_fixed_chunks_from_irregular_input() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        // Identity resampler keeps chunk boundaries observable.
        let resampler =
            audio::create_resampler(UPLINK_SAMPLE_RATE, UPLINK_SAMPLE_RATE, CAPTURE_CHUNK_SIZE)
                .unwrap();
        tokio::spawn(pump(raw_rx, event_tx, resampler, None));

        // Two irregular deliveries totalling 1.5 chunks: exactly one event.
        raw_tx.send(vec![0.3; 700]).await.unwrap();
        raw_tx.send(vec![0.3; 836]).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            CaptureEvent::AudioChunk { data, level } => {
                assert!(!data.is_empty());
                assert!(level > 0.0);
            }
            other => panic!("expected audio chunk, got {other:?}"),
        }
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pump_polls_frame_source() {
        struct StaticFrame;
        impl FrameSource for StaticFrame {
            fn next_frame(&self) -> Option<String> {
                Some("ZnJhbWU=".to_string())
            }
        }

        let (_raw_tx, raw_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let resampler =
            audio::create_resampler(UPLINK_SAMPLE_RATE, UPLINK_SAMPLE_RATE, CAPTURE_CHUNK_SIZE)
                .unwrap();
        tokio::spawn(pump(raw_rx, event_tx, resampler, Some(Arc::new(StaticFrame))));

        let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.mime_type(), "image/jpeg");
        assert_eq!(event.data(), "ZnJhbWU=");
    }
}

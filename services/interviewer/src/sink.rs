//! Bridges session playback to the cpal output stream.
//!
//! The sink resamples downlink audio to the device rate and pushes it into
//! the ring buffer the output callback drains. Completion is signalled after
//! the pushed samples' play time has elapsed; `stop` raises a drain flag the
//! output callback consumes, so stale audio vanishes within one callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gemini_live::AudioSink;
use interview_native_utils::audio::{self, DOWNLINK_SAMPLE_RATE};
use ringbuf::HeapProd;
use ringbuf::traits::Producer;
use rubato::{FastFixedIn, Resampler};
use tokio::sync::oneshot;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

pub struct RingBufferSink {
    producer: HeapProd<f32>,
    resampler: FastFixedIn<f32>,
    device_rate: f64,
    drain: Arc<AtomicBool>,
}

impl RingBufferSink {
    pub fn new(
        producer: HeapProd<f32>,
        device_rate: f64,
        drain: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let resampler =
            audio::create_resampler(DOWNLINK_SAMPLE_RATE, device_rate, RESAMPLE_CHUNK_SIZE)?;
        Ok(Self {
            producer,
            resampler,
            device_rate,
            drain,
        })
    }
}

impl AudioSink for RingBufferSink {
    fn play(&mut self, samples: Vec<f32>, sample_rate: u32, done: oneshot::Sender<()>) {
        if sample_rate as f64 != DOWNLINK_SAMPLE_RATE {
            tracing::warn!(
                rate = sample_rate,
                "unexpected playback rate; resampling as downlink audio"
            );
        }
        let chunk_size = self.resampler.input_frames_next();
        let mut pushed = 0usize;
        for chunk in audio::split_for_chunks(&samples, chunk_size) {
            match self.resampler.process(&[chunk.as_slice()], None) {
                Ok(resampled) => {
                    for &sample in &resampled[0] {
                        if self.producer.try_push(sample).is_err() {
                            tracing::warn!("output buffer full; playback sample dropped");
                        } else {
                            pushed += 1;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "playback resample failed; chunk dropped"),
            }
        }

        // Completion fires once the pushed audio has had time to leave the
        // device, keeping the scheduler's one-render-in-flight pacing honest.
        let play_time = Duration::from_secs_f64(pushed as f64 / self.device_rate);
        tokio::spawn(async move {
            tokio::time::sleep(play_time).await;
            let _ = done.send(());
        });
    }

    fn stop(&mut self) {
        self.drain.store(true, Ordering::SeqCst);
    }
}

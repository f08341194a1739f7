//! Sample-rate conversion and buffer helpers shared by capture and playback.

use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Rate the endpoint expects for uplink microphone audio.
pub const UPLINK_SAMPLE_RATE: f64 = 16_000.0;
/// Rate the endpoint produces for downlink playback audio.
pub const DOWNLINK_SAMPLE_RATE: f64 = 24_000.0;

/// Builds a mono resampler converting between the given rates, consuming
/// fixed-size input chunks.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, rubato::ResamplerConstructionError> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into fixed-size chunks, zero-padding the last one so every
/// chunk satisfies a fixed-input resampler.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Heap ring buffer bridging an async producer and a realtime audio callback.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to mono. A channel count of 0 or 1
/// returns the input unchanged.
pub fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

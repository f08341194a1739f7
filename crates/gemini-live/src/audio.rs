//! Stateless PCM codec helpers: base64 on the wire, f32 samples in memory.

use base64::Engine;

/// Sample rate of the audio the endpoint sends back, used when the inbound
/// MIME type carries no `rate=` parameter.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Decodes a base64 string of little-endian PCM16 into normalized f32 samples.
pub fn decode_f32(base64_fragment: &str) -> Vec<f32> {
    if let Ok(pcm16) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        pcm16
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect()
    } else {
        tracing::error!("failed to decode base64 audio fragment");
        Vec::new()
    }
}

/// Decodes a base64 string into raw i16 PCM values.
pub fn decode_i16(base64_fragment: &str) -> Vec<i16> {
    if let Ok(pcm16) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        pcm16
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    } else {
        tracing::error!("failed to decode base64 audio fragment");
        Vec::new()
    }
}

/// Encodes f32 samples as base64 PCM16.
pub fn encode_f32(pcm32: &[f32]) -> String {
    encode_i16(&convert_f32_to_i16(pcm32))
}

/// Encodes i16 PCM samples as base64.
pub fn encode_i16(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Encodes arbitrary bytes (e.g. a JPEG frame) as base64.
pub fn encode_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Scale matches the decode path (divide by 32768), so quantized values
/// survive a full encode/decode cycle; +1.0 clamps to `i16::MAX`.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Scalar 0-100 loudness estimate from mean absolute magnitude. Only every
/// tenth sample is inspected; the callers use this for a UI meter, not DSP.
pub fn level_of(samples: &[f32]) -> f32 {
    const STEP: usize = 10;
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for sample in samples.iter().step_by(STEP) {
        sum += sample.abs();
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f32) * 100.0 * 5.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_round_trip_is_lossless() {
        let samples: Vec<i16> = vec![0, 1, -1, 1000, -1000, i16::MAX, i16::MIN, 12345];
        let encoded = encode_i16(&samples);
        assert_eq!(decode_i16(&encoded), samples);
    }

    #[test]
    fn f32_round_trip_preserves_quantized_values() {
        // f32 -> i16 quantizes, but i16 -> f32 -> i16 must be exact.
        let samples = vec![0i16, 8192, -8192, 16384, -16384];
        let as_f32 = convert_i16_to_f32(&samples);
        let encoded = encode_f32(&as_f32);
        assert_eq!(decode_i16(&encoded), samples);
    }

    #[test]
    fn f32_round_trip_is_exact_across_the_full_range() {
        let samples: Vec<i16> = vec![1, -1, 8191, -8191, 12345, i16::MAX, i16::MIN];
        let encoded = encode_f32(&convert_i16_to_f32(&samples));
        assert_eq!(decode_i16(&encoded), samples);
        // Out-of-range input saturates instead of wrapping.
        assert_eq!(convert_f32_to_i16(&[1.5, -1.5]), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn decode_rejects_garbage_without_panicking() {
        assert!(decode_f32("not base64 at all!!!").is_empty());
        assert!(decode_i16("???").is_empty());
    }

    #[test]
    fn level_of_silence_is_zero_and_loud_is_capped() {
        assert_eq!(level_of(&[]), 0.0);
        assert_eq!(level_of(&vec![0.0; 1000]), 0.0);
        assert_eq!(level_of(&vec![1.0; 1000]), 100.0);
        let quiet = level_of(&vec![0.01; 1000]);
        assert!(quiet > 0.0 && quiet < 100.0);
    }
}

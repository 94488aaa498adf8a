//! Normalized f32 to signed 16-bit PCM conversion.

/// Encode a single normalized sample as signed 16-bit PCM.
///
/// Input is clipped to [-1.0, 1.0]. Negative samples scale by 0x8000 and
/// positive by 0x7FFF so both endpoints map onto the full i16 range.
pub fn encode_sample(sample: f32) -> i16 {
    let sample = sample.clamp(-1.0, 1.0);
    if sample < 0.0 {
        (sample * 0x8000 as f32) as i16
    } else {
        (sample * 0x7FFF as f32) as i16
    }
}

/// Encode a block of normalized samples as signed 16-bit PCM.
pub fn encode_block(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(encode_sample).collect()
}

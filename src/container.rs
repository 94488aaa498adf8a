//! Canonical WAV container assembly.
//!
//! Builds the uncompressed RIFF/WAVE byte stream submitted to the
//! transcription service: a fixed 44-byte header followed by the raw
//! little-endian PCM payload. This layout is the one binary contract of
//! the pipeline and must be reproduced bit-exactly.

use crate::audio::SAMPLE_RATE;

/// Length of the RIFF/WAVE header in bytes.
pub const HEADER_LEN: usize = 44;

const NUM_CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = NUM_CHANNELS * BITS_PER_SAMPLE / 8;

/// Build a complete WAV byte stream from 16 kHz mono s16 samples.
///
/// The output length is exactly `44 + 2 * samples.len()` and the declared
/// data size always matches the payload.
pub fn build(samples: &[i16]) -> Vec<u8> {
    let data_size = (samples.len() * 2) as u32;
    let byte_rate = SAMPLE_RATE * BLOCK_ALIGN as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // uncompressed PCM
    out.extend_from_slice(&NUM_CHANNELS.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }

    out
}

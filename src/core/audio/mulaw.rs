//! ITU-T G.711 μ-law companding.
//!
//! The telephony provider delivers narrowband audio as 8-bit μ-law at 8kHz;
//! the AI peer speaks linear PCM16. Both directions of the codec live here.
//!
//! The transform is stateless and exact: a μ-law byte decoded and re-encoded
//! without an intervening resample yields the same byte for all 256 values.

/// μ-law bias added before segment search (G.711).
const BIAS: i32 = 0x84;

/// Maximum biased magnitude; keeps the segment search inside 15 bits.
const CLIP: i32 = 0x7FFF;

/// Decode a single μ-law byte to a linear PCM16 sample.
#[inline]
pub fn decode_sample(byte: u8) -> i16 {
    let inverted = !byte;
    let sign = inverted & 0x80;
    let segment = ((inverted >> 4) & 0x07) as i32;
    let quant = (inverted & 0x0F) as i32;

    let mut magnitude = ((quant << 3) + BIAS) << segment;
    magnitude -= BIAS;

    // Negative zero (code 0x7F) must stay distinct from positive zero or
    // re-encoding collapses it onto 0xFF. -1 re-encodes to 0x7F exactly.
    let sample = if sign != 0 {
        if magnitude == 0 { -1 } else { -magnitude }
    } else {
        magnitude
    };
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Encode a linear PCM16 sample to a μ-law byte.
#[inline]
pub fn encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = (sample as i32).abs() + BIAS;
    if magnitude > CLIP {
        magnitude = CLIP;
    }

    // Highest segment (0..=7) whose bit is set in the biased magnitude.
    let mut segment: u32 = 7;
    let mut mask = 0x4000;
    while segment > 0 && (magnitude & mask) == 0 {
        segment -= 1;
        mask >>= 1;
    }

    let quant = ((magnitude >> (segment + 3)) & 0x0F) as u8;
    !(sign | ((segment as u8) << 4) | quant)
}

/// Decode a μ-law byte slice into PCM16 samples.
pub fn decode(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| decode_sample(b)).collect()
}

/// Encode PCM16 samples into μ-law bytes.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

/// Decode μ-law bytes directly to PCM16 little-endian bytes.
pub fn decode_to_pcm16_le(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for &b in data {
        out.extend_from_slice(&decode_sample(b).to_le_bytes());
    }
    out
}

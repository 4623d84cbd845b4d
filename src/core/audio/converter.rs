//! Per-session audio format conversion.
//!
//! Two symmetric paths, one instance of each per call:
//! - inbound: provider μ-law at the telephony rate -> linear PCM16 at the
//!   AI peer rate
//! - outbound: PCM16 at the AI peer rate -> μ-law at the telephony rate
//!
//! Conversion is CPU-bound and fast; it never blocks. If the underlying
//! resampling engine is not ready yet the call fails fast so a stalled
//! session cannot stall others.

use std::sync::Arc;

use bytes::Bytes;

use super::resampler::{Direction, ResamplerEngine};
use super::{ConvertError, mulaw};

/// Directional codec/resampler pair for one session.
pub struct AudioConverter {
    engine: Arc<ResamplerEngine>,
}

impl AudioConverter {
    pub fn new(engine: Arc<ResamplerEngine>) -> Self {
        Self { engine }
    }

    /// Whether the underlying resampling engine has finished initializing.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Telephony -> AI: decode μ-law, upsample, emit PCM16 little-endian.
    pub fn inbound(&self, mulaw_payload: &[u8]) -> Result<Bytes, ConvertError> {
        let linear = mulaw::decode(mulaw_payload);
        let upsampled = self.engine.process(Direction::Up, &linear)?;

        let mut out = Vec::with_capacity(upsampled.len() * 2);
        for sample in upsampled {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(Bytes::from(out))
    }

    /// AI -> telephony: downsample PCM16 little-endian, re-encode as μ-law.
    pub fn outbound(&self, pcm16_le: &[u8]) -> Result<Vec<u8>, ConvertError> {
        if pcm16_le.len() % 2 != 0 {
            return Err(ConvertError::InvalidPcm(pcm16_le.len()));
        }

        let samples: Vec<i16> = pcm16_le
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        let downsampled = self.engine.process(Direction::Down, &samples)?;

        Ok(mulaw::encode(&downsampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    async fn ready_converter() -> AudioConverter {
        let engine = ResamplerEngine::spawn(8000, 24000, 2);
        engine.wait_ready(Duration::from_secs(5)).await.unwrap();
        AudioConverter::new(engine)
    }

    #[tokio::test]
    async fn test_inbound_sizes() {
        let converter = ready_converter().await;

        // 160 μ-law bytes (20ms at 8kHz) -> 480 samples -> 960 PCM16 bytes.
        let out = converter.inbound(&[0xFFu8; 160]).unwrap();
        assert_eq!(out.len(), 960);
    }

    #[tokio::test]
    async fn test_outbound_sizes() {
        let converter = ready_converter().await;

        // 480 samples at 24kHz (20ms) -> 160 μ-law bytes.
        let pcm = vec![0u8; 960];
        let out = converter.outbound(&pcm).unwrap();
        assert_eq!(out.len(), 160);
    }

    #[tokio::test]
    async fn test_outbound_rejects_odd_length() {
        let converter = ready_converter().await;
        assert!(matches!(
            converter.outbound(&[0u8; 961]),
            Err(ConvertError::InvalidPcm(961))
        ));
    }

    #[tokio::test]
    async fn test_not_ready_is_loud() {
        let engine = ResamplerEngine::spawn(8000, 24000, 2);
        let converter = AudioConverter::new(engine);
        // Warm-up may or may not have finished; a failure must be explicit.
        if let Err(e) = converter.inbound(&[0xFFu8; 160]) {
            assert!(matches!(e, ConvertError::EngineNotReady));
        }
    }
}

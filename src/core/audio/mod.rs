//! Audio processing for the call bridge: μ-law companding, sample-rate
//! conversion, and outbound batching.

pub mod batch;
pub mod converter;
pub mod mulaw;
pub mod resampler;

pub use batch::{AudioBatcher, BatchConfig, FlushFn};
pub use converter::AudioConverter;
pub use resampler::{Direction, ResamplerEngine};

use thiserror::Error;

/// Errors from audio conversion and resampling.
///
/// Per-fragment failures are contained by the caller: the fragment is
/// dropped and logged, the call continues.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Conversion attempted before the resampling engine finished
    /// initializing.
    #[error("resampling engine not ready")]
    EngineNotReady,

    /// The resampling engine failed to initialize.
    #[error("resampling engine failed to initialize: {0}")]
    EngineInitFailed(String),

    /// The engine did not become ready within the wait bound.
    #[error("resampling engine not ready within {0:?}")]
    EngineInitTimeout(tokio::time::Duration),

    /// PCM16 payload with an odd byte length.
    #[error("invalid PCM16 payload length: {0}")]
    InvalidPcm(usize),

    /// Resampler processing error.
    #[error("resample failed: {0}")]
    Resample(String),
}

//! Sample-rate conversion between the telephony rate and the AI peer rate.
//!
//! The engine wraps `rubato`'s FFT resampler. FFT plan construction is the
//! slow part, so it happens on a background task behind a readiness gate:
//! callers either await `wait_ready` with a bound or poll `is_ready`, and any
//! conversion attempted before the gate opens fails with a distinct error
//! instead of passing audio through unconverted.

use std::collections::HashMap;

use parking_lot::Mutex;
use rubato::{FftFixedIn, Resampler};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::ConvertError;

/// Fragments shorter than this are resampled with linear interpolation;
/// the FFT resampler needs enough samples to work with.
const MIN_FFT_INPUT: usize = 64;

/// Lifecycle of the resampling engine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineState {
    Initializing,
    Ready,
    Failed(String),
}

/// Direction of a rate conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Telephony rate up to the AI peer rate.
    Up,
    /// AI peer rate down to the telephony rate.
    Down,
}

/// Resampling engine shared by both directions of one call.
///
/// One instance per session; no audio state is shared across calls.
pub struct ResamplerEngine {
    telephony_rate: u32,
    ai_rate: u32,
    /// rubato sub-chunk count; higher is cheaper per chunk, lower is
    /// higher fidelity. Tunable per deployment.
    quality: usize,
    state_rx: watch::Receiver<EngineState>,
    /// FFT resamplers are stateful and sized to a fixed input length, so
    /// they are cached per (direction, fragment length).
    resamplers: Mutex<HashMap<(Direction, usize), FftFixedIn<f32>>>,
}

impl ResamplerEngine {
    /// Create the engine and start warming up the FFT plans in the
    /// background. The returned engine is not ready until the warm-up
    /// completes; see [`ResamplerEngine::wait_ready`].
    pub fn spawn(telephony_rate: u32, ai_rate: u32, quality: usize) -> std::sync::Arc<Self> {
        let (state_tx, state_rx) = watch::channel(EngineState::Initializing);

        let engine = std::sync::Arc::new(Self {
            telephony_rate,
            ai_rate,
            quality,
            state_rx,
            resamplers: Mutex::new(HashMap::new()),
        });

        // Plan the FFTs for the canonical 20ms telephony frame off the hot
        // path. Construction failure here means every conversion would fail,
        // so it is surfaced through the gate rather than per fragment.
        let frame_in = (telephony_rate as usize * 20) / 1000;
        let frame_out = (ai_rate as usize * 20) / 1000;
        tokio::spawn({
            let engine = engine.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    FftFixedIn::<f32>::new(
                        telephony_rate as usize,
                        ai_rate as usize,
                        frame_in,
                        quality,
                        1,
                    )
                    .and_then(|up| {
                        FftFixedIn::<f32>::new(
                            ai_rate as usize,
                            telephony_rate as usize,
                            frame_out,
                            quality,
                            1,
                        )
                        .map(|down| (up, down))
                    })
                })
                .await;

                match result {
                    Ok(Ok((up, down))) => {
                        let mut cache = engine.resamplers.lock();
                        cache.insert((Direction::Up, frame_in), up);
                        cache.insert((Direction::Down, frame_out), down);
                        drop(cache);
                        debug!(telephony_rate, ai_rate, quality, "resampler engine ready");
                        let _ = state_tx.send(EngineState::Ready);
                    }
                    Ok(Err(e)) => {
                        warn!("resampler engine initialization failed: {e}");
                        let _ = state_tx.send(EngineState::Failed(e.to_string()));
                    }
                    Err(e) => {
                        warn!("resampler warm-up task failed: {e}");
                        let _ = state_tx.send(EngineState::Failed(e.to_string()));
                    }
                }
            }
        });

        engine
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        *self.state_rx.borrow() == EngineState::Ready
    }

    /// Block (bounded) until the engine is ready.
    ///
    /// Returns `ConvertError::EngineInitFailed` if initialization failed and
    /// `ConvertError::EngineInitTimeout` if the bound elapses first.
    pub async fn wait_ready(&self, bound: Duration) -> Result<(), ConvertError> {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|state| *state != EngineState::Initializing);
        match tokio::time::timeout(bound, wait).await {
            Ok(Ok(state)) => match &*state {
                EngineState::Ready => Ok(()),
                EngineState::Failed(reason) => {
                    Err(ConvertError::EngineInitFailed(reason.clone()))
                }
                EngineState::Initializing => unreachable!(),
            },
            Ok(Err(_)) => Err(ConvertError::EngineInitFailed(
                "initializer dropped".to_string(),
            )),
            Err(_) => Err(ConvertError::EngineInitTimeout(bound)),
        }
    }

    fn rates(&self, direction: Direction) -> (usize, usize) {
        match direction {
            Direction::Up => (self.telephony_rate as usize, self.ai_rate as usize),
            Direction::Down => (self.ai_rate as usize, self.telephony_rate as usize),
        }
    }

    /// Resample one fragment of mono PCM16 samples.
    ///
    /// Fails fast with `EngineNotReady` before the warm-up completes; a
    /// stalled engine must not stall the caller's audio path.
    pub fn process(
        &self,
        direction: Direction,
        samples: &[i16],
    ) -> Result<Vec<i16>, ConvertError> {
        match &*self.state_rx.borrow() {
            EngineState::Ready => {}
            EngineState::Initializing => return Err(ConvertError::EngineNotReady),
            EngineState::Failed(reason) => {
                return Err(ConvertError::EngineInitFailed(reason.clone()));
            }
        }

        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let input: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();

        let (from, to) = self.rates(direction);
        let output = if input.len() < MIN_FFT_INPUT {
            resample_linear(&input, from, to)
        } else {
            let mut cache = self.resamplers.lock();
            let resampler = match cache.entry((direction, input.len())) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    let r = FftFixedIn::<f32>::new(from, to, input.len(), self.quality, 1)
                        .map_err(|e| ConvertError::Resample(e.to_string()))?;
                    e.insert(r)
                }
            };
            let frames = resampler
                .process(&[input], None)
                .map_err(|e| ConvertError::Resample(e.to_string()))?;
            frames.into_iter().next().unwrap_or_default()
        };

        Ok(output
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect())
    }
}

/// Linear interpolation for fragments too short for the FFT path.
fn resample_linear(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    let ratio = to as f64 / from as f64;
    let new_len = (input.len() as f64 * ratio) as usize;

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src = i as f64 / ratio;
        let lo = src.floor() as usize;
        let hi = (lo + 1).min(input.len().saturating_sub(1));
        let frac = (src - lo as f64) as f32;
        out.push(input[lo] * (1.0 - frac) + input[hi] * frac);
    }
    out
}

//! Outbound audio batching.
//!
//! The AI peer emits audio in small deltas; writing each one to the
//! telephony socket individually maximizes transport overhead and fragments
//! playback. The batcher coalesces fragments until either a size target is
//! reached (flush immediately) or a latency bound expires (flush whatever is
//! buffered), trading at most one flush interval of added delay for fewer,
//! larger writes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

/// Callback invoked with each concatenated flush.
pub type FlushFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Batching parameters; configuration, not constants.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Flush as soon as this many bytes are buffered.
    pub target_bytes: usize,
    /// Flush anything buffered at least this often.
    pub max_latency: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            // ~100ms of PCM16 at 24kHz.
            target_bytes: 4800,
            max_latency: Duration::from_millis(50),
        }
    }
}

struct BatchState {
    fragments: Vec<Bytes>,
    total: usize,
    timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

/// Per-direction, per-session fragment accumulator.
pub struct AudioBatcher {
    config: BatchConfig,
    state: Arc<Mutex<BatchState>>,
    on_flush: FlushFn,
}

impl AudioBatcher {
    pub fn new(config: BatchConfig, on_flush: FlushFn) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BatchState {
                fragments: Vec::new(),
                total: 0,
                timer: None,
                destroyed: false,
            })),
            on_flush,
        }
    }

    /// Append a fragment. Flushes immediately once the size target is
    /// reached; otherwise arms the latency timer if none is pending.
    pub fn push(&self, fragment: Bytes) {
        if fragment.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        if state.destroyed {
            trace!("fragment dropped after batcher destroy");
            return;
        }

        state.total += fragment.len();
        state.fragments.push(fragment);

        if state.total >= self.config.target_bytes {
            Self::flush_locked(&mut state, &self.on_flush);
            return;
        }

        if state.timer.is_none() {
            let shared = self.state.clone();
            let on_flush = self.on_flush.clone();
            let max_latency = self.config.max_latency;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(max_latency).await;
                let mut state = shared.lock();
                // The flush that would have cancelled this timer may have
                // raced with the wake-up; an empty buffer makes it a no-op.
                state.timer = None;
                if !state.destroyed {
                    Self::flush_locked(&mut state, &on_flush);
                }
            }));
        }
    }

    /// Emit everything buffered as one unit. No-op when empty.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state, &self.on_flush);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.state.lock().total
    }

    /// Cancel timers and perform one final flush. Further pushes are
    /// dropped; residual bytes are emitted exactly once, never lost.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        Self::flush_locked(&mut state, &self.on_flush);
    }

    fn flush_locked(state: &mut BatchState, on_flush: &FlushFn) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.fragments.is_empty() {
            return;
        }

        let mut combined = Vec::with_capacity(state.total);
        for fragment in state.fragments.drain(..) {
            combined.extend_from_slice(&fragment);
        }
        state.total = 0;
        on_flush(Bytes::from(combined));
    }
}

impl Drop for AudioBatcher {
    fn drop(&mut self) {
        self.destroy();
    }
}

//! Call session state and lifecycle.
//!
//! One [`CallSession`] exists per active phone call. The session owns the
//! audio pipeline for that call (converter, outbound batcher), the handle to
//! the AI peer, and a sender for the telephony socket. All lifecycle
//! transitions happen through the [`SessionRegistry`]; handlers only read
//! and forward through the accessors here.

pub mod registry;

pub use registry::{PeerFactory, RegistryConfig, SessionRegistry};

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::core::audio::{AudioBatcher, AudioConverter, BatchConfig, FlushFn, ResamplerEngine};
use crate::core::peer::{AiPeer, PeerError};

/// Native sample rate of the telephony media stream, in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Errors from session registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session already exists for this call.
    #[error("session already exists for call {0}")]
    Duplicate(String),

    /// No session for this call.
    #[error("no session for call {0}")]
    NotFound(String),

    /// AI peer initialization failed.
    #[error("AI peer initialization failed: {0}")]
    PeerInit(#[from] PeerError),
}

/// Lifecycle state of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created by the intake router, AI peer not yet warm.
    Created,
    /// AI peer warm, waiting for the media socket.
    AwaitingMedia,
    /// Media socket attached, audio flowing.
    Streaming,
    /// Teardown in progress.
    Ending,
    /// Terminal.
    Ended,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Created => "created",
            Lifecycle::AwaitingMedia => "awaiting-media",
            Lifecycle::Streaming => "streaming",
            Lifecycle::Ending => "ending",
            Lifecycle::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Why a session ended. Logged with every teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Call ran to completion.
    Completed,
    /// Call was never answered or media never arrived.
    Missed,
    /// Something went wrong (peer init failure, provider error callback).
    Failed,
    /// Caller hung up mid-call.
    CallerHangup,
    /// Process is shutting down.
    ServerShutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Missed => "missed",
            EndReason::Failed => "failed",
            EndReason::CallerHangup => "caller-hangup",
            EndReason::ServerShutdown => "server-shutdown",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frames routed to the telephony socket's sender task.
#[derive(Debug)]
pub enum OutboundFrame {
    /// μ-law audio, to be wrapped in a `media` event by the socket task.
    Media(Bytes),
    /// Close the socket.
    Close,
}

/// Sender half of the telephony socket, owned by the media handler's
/// socket task and registered with the session on `start`.
pub type TransportHandle = mpsc::Sender<OutboundFrame>;

/// Transport-handle fields, mutated only through registry accessors.
struct TransportState {
    lifecycle: Lifecycle,
    transport: Option<TransportHandle>,
    stream_sid: Option<String>,
}

/// State of one active phone call.
///
/// The AI peer handle and telephony socket are owned exclusively by their
/// session; converter and batcher instances are per-session so concurrent
/// calls share no mutable audio state.
pub struct CallSession {
    pub call_sid: String,
    pub business_id: String,
    pub agent_id: String,
    pub from: String,
    pub to: String,
    pub created_at: Instant,

    state: Mutex<TransportState>,
    /// Guards AI-peer initialization; exactly-once under concurrent
    /// invocation from intake pre-warm and media-handler fallback.
    pub(crate) init_lock: tokio::sync::Mutex<()>,
    peer: parking_lot::RwLock<Option<Arc<dyn AiPeer>>>,

    converter: AudioConverter,
    batcher: AudioBatcher,
}

impl CallSession {
    /// Build a session with its per-call audio pipeline. The batcher's
    /// flush callback resolves the transport at flush time through a weak
    /// reference, so a flush racing teardown is a no-op instead of a leak.
    pub(crate) fn new(
        call_sid: String,
        business_id: String,
        agent_id: String,
        from: String,
        to: String,
        engine: Arc<ResamplerEngine>,
        batch: BatchConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<CallSession>| {
            let weak = weak.clone();
            let on_flush: FlushFn = Arc::new(move |mulaw: Bytes| {
                if let Some(session) = weak.upgrade() {
                    session.send_media(mulaw);
                }
            });

            Self {
                call_sid,
                business_id,
                agent_id,
                from,
                to,
                created_at: Instant::now(),
                state: Mutex::new(TransportState {
                    lifecycle: Lifecycle::Created,
                    transport: None,
                    stream_sid: None,
                }),
                init_lock: tokio::sync::Mutex::new(()),
                peer: parking_lot::RwLock::new(None),
                converter: AudioConverter::new(engine),
                batcher: AudioBatcher::new(batch, on_flush),
            }
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub fn stream_sid(&self) -> Option<String> {
        self.state.lock().stream_sid.clone()
    }

    /// AI peer handle, if initialization has completed. Non-blocking.
    pub fn peer(&self) -> Option<Arc<dyn AiPeer>> {
        self.peer.read().clone()
    }

    pub fn converter(&self) -> &AudioConverter {
        &self.converter
    }

    /// Decode one inbound μ-law fragment and forward it to the AI peer in
    /// arrival order. Fragments that fail to convert, or that arrive while
    /// peer initialization is still in flight, are dropped with a log line;
    /// a bad fragment never ends an otherwise healthy call.
    pub async fn forward_inbound(&self, mulaw_payload: &[u8]) {
        let Some(peer) = self.peer() else {
            trace!(call_sid = %self.call_sid, "inbound fragment dropped, AI peer still initializing");
            return;
        };

        match self.converter.inbound(mulaw_payload) {
            Ok(pcm) => {
                if let Err(e) = peer.send_audio(pcm).await {
                    warn!(call_sid = %self.call_sid, "failed to forward audio to AI peer: {e}");
                }
            }
            Err(e) => {
                warn!(call_sid = %self.call_sid, "inbound fragment dropped: {e}");
            }
        }
    }

    /// Downsample/encode one synthesized PCM16 fragment and hand it to the
    /// outbound batcher. Conversion failures drop the fragment; corrupted
    /// audio is never sent.
    pub fn push_synthesized(&self, pcm16_le: &[u8]) {
        match self.converter.outbound(pcm16_le) {
            Ok(mulaw) => self.batcher.push(Bytes::from(mulaw)),
            Err(e) => {
                warn!(call_sid = %self.call_sid, "synthesized fragment dropped: {e}");
            }
        }
    }

    fn send_media(&self, mulaw: Bytes) {
        let state = self.state.lock();
        if let Some(tx) = &state.transport {
            if tx.try_send(OutboundFrame::Media(mulaw)).is_err() {
                warn!(call_sid = %self.call_sid, "telephony socket backlogged, outbound frame dropped");
            }
        } else {
            trace!(call_sid = %self.call_sid, "outbound flush with no socket attached");
        }
    }

    /// Store the AI peer handle. Refused once teardown has started: a
    /// connect finishing after `detach_for_teardown` took the (empty) peer
    /// slot would otherwise be stored on a dead session and never closed.
    /// The lifecycle check happens under the slot's write lock, so a
    /// refusal and a successful take cannot interleave.
    pub(crate) fn set_peer(&self, peer: Arc<dyn AiPeer>) -> bool {
        let mut slot = self.peer.write();
        if matches!(self.lifecycle(), Lifecycle::Ending | Lifecycle::Ended) {
            return false;
        }
        *slot = Some(peer);
        true
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.state.lock().lifecycle = lifecycle;
    }

    /// Attach the telephony socket. Returns false if the session is already
    /// tearing down, in which case the caller should close the socket.
    pub(crate) fn attach(&self, transport: TransportHandle, stream_sid: String) -> bool {
        let mut state = self.state.lock();
        if matches!(state.lifecycle, Lifecycle::Ending | Lifecycle::Ended) {
            return false;
        }
        state.transport = Some(transport);
        state.stream_sid = Some(stream_sid);
        state.lifecycle = Lifecycle::Streaming;
        true
    }

    /// Flush residual audio, then detach and return both handles for
    /// closing. Called exactly once per session, from teardown.
    pub(crate) fn detach_for_teardown(
        &self,
    ) -> (Option<TransportHandle>, Option<Arc<dyn AiPeer>>) {
        self.set_lifecycle(Lifecycle::Ending);
        // Residual batched audio goes out before the socket handle is
        // dropped; bytes are flushed exactly once, never lost.
        self.batcher.destroy();

        let mut state = self.state.lock();
        let transport = state.transport.take();
        state.stream_sid = None;
        drop(state);

        let peer = self.peer.write().take();
        (transport, peer)
    }
}

//! The authoritative map from call identifier to session state.
//!
//! The registry is the single shared mutable structure of the bridge. It is
//! written concurrently by the intake router (creation), the media handler
//! (socket attachment, peer-init fallback), and administrative paths
//! (status callbacks, shutdown). Keyed access goes through `DashMap`;
//! per-session mutation is serialized by the session's own locks, so calls
//! never contend with each other and the expensive AI-peer connection is
//! performed without holding any registry-wide lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{CallSession, EndReason, Lifecycle, OutboundFrame, SessionError, TransportHandle};
use crate::core::audio::{BatchConfig, ResamplerEngine};
use crate::core::peer::{AiPeer, PeerConfig, PeerEvent, PeerResult, create_peer};

/// Builds an AI peer client. Injectable so tests can count connections
/// without reaching a real endpoint.
pub type PeerFactory = Arc<dyn Fn(&str, PeerConfig) -> PeerResult<Arc<dyn AiPeer>> + Send + Sync>;

/// Registry configuration, derived from deployment config at startup.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// AI peer provider name, resolved through the peer factory.
    pub peer_provider: String,
    /// Connection parameters handed to each new peer client.
    pub peer: PeerConfig,
    /// Telephony media sample rate in Hz.
    pub telephony_rate: u32,
    /// AI peer sample rate in Hz.
    pub ai_rate: u32,
    /// Resampler quality (sub-chunk count).
    pub resampler_quality: usize,
    /// Outbound batching parameters.
    pub batch: BatchConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            peer_provider: "openai".to_string(),
            peer: PeerConfig::default(),
            telephony_rate: super::TELEPHONY_SAMPLE_RATE,
            ai_rate: 24000,
            resampler_quality: 2,
            batch: BatchConfig::default(),
        }
    }
}

/// Process-wide session registry. One instance, shared via `Arc`.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CallSession>>,
    config: RegistryConfig,
    peer_factory: PeerFactory,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_peer_factory(config, Arc::new(|provider, cfg| create_peer(provider, cfg)))
    }

    /// Registry with an injected peer factory. Used by tests.
    pub fn with_peer_factory(config: RegistryConfig, peer_factory: PeerFactory) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            peer_factory,
        }
    }

    /// Create the session for a call. Exactly one creation wins under
    /// concurrent attempts for the same call identifier; the loser gets
    /// `SessionError::Duplicate`, never a silent second session.
    pub fn create_session(
        &self,
        call_sid: &str,
        business_id: &str,
        agent_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Arc<CallSession>, SessionError> {
        match self.sessions.entry(call_sid.to_string()) {
            Entry::Occupied(_) => Err(SessionError::Duplicate(call_sid.to_string())),
            Entry::Vacant(entry) => {
                let engine = ResamplerEngine::spawn(
                    self.config.telephony_rate,
                    self.config.ai_rate,
                    self.config.resampler_quality,
                );
                let session = CallSession::new(
                    call_sid.to_string(),
                    business_id.to_string(),
                    agent_id.to_string(),
                    from.to_string(),
                    to.to_string(),
                    engine,
                    self.config.batch,
                );
                entry.insert(session.clone());
                info!(
                    call_sid,
                    business_id,
                    agent_id,
                    from,
                    to,
                    "call session created"
                );
                Ok(session)
            }
        }
    }

    /// Non-blocking lookup.
    pub fn get(&self, call_sid: &str) -> Result<Arc<CallSession>, SessionError> {
        self.sessions
            .get(call_sid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(call_sid.to_string()))
    }

    /// Attach the telephony socket and stream identifier to a session.
    /// Returns `Ok(false)` when the session is already tearing down; the
    /// attach is a logged no-op and the caller closes its socket.
    pub fn attach_transport(
        &self,
        call_sid: &str,
        transport: TransportHandle,
        stream_sid: &str,
    ) -> Result<bool, SessionError> {
        let session = self.get(call_sid)?;
        if session.attach(transport, stream_sid.to_string()) {
            info!(call_sid, stream_sid, "telephony socket attached");
            Ok(true)
        } else {
            warn!(call_sid, stream_sid, "socket attach ignored, session already ended");
            Ok(false)
        }
    }

    /// Connect the AI peer for a session, exactly once.
    ///
    /// Idempotent and safe under concurrent invocation: intake-time
    /// pre-warming and the media-handler fallback can both call this
    /// before either completes and only one connection is established.
    /// The per-session init lock serializes the check-and-set; the
    /// connection itself runs without any registry-wide lock, so other
    /// sessions stay fully operable while this one connects.
    pub async fn init_ai_peer(self: &Arc<Self>, call_sid: &str) -> Result<(), SessionError> {
        let session = self.get(call_sid)?;

        let _guard = session.init_lock.lock().await;
        if session.peer().is_some() {
            debug!(call_sid, "AI peer already initialized");
            return Ok(());
        }

        let peer = (self.peer_factory)(&self.config.peer_provider, self.config.peer.clone())?;

        // Callbacks go in before connect so no early frame is missed.
        let audio_target = Arc::downgrade(&session);
        peer.on_audio(Arc::new(move |pcm| {
            let target = audio_target.clone();
            Box::pin(async move {
                if let Some(session) = target.upgrade() {
                    session.push_synthesized(&pcm);
                }
            })
        }));

        let registry: Weak<SessionRegistry> = Arc::downgrade(self);
        let event_call_sid = call_sid.to_string();
        peer.on_event(Arc::new(move |event| {
            let registry = registry.clone();
            let call_sid = event_call_sid.clone();
            Box::pin(async move {
                match event {
                    PeerEvent::Ready => {
                        debug!(call_sid, "AI peer ready");
                    }
                    PeerEvent::Error(message) => {
                        warn!(call_sid, "AI peer error: {message}");
                    }
                    PeerEvent::Closed => {
                        // Unexpected close mid-call kills the session;
                        // registry-driven teardown already removed it and
                        // this becomes a no-op.
                        if let Some(registry) = registry.upgrade() {
                            registry.end_session(&call_sid, EndReason::Failed).await;
                        }
                    }
                }
            })
        }));

        peer.connect().await?;
        if !session.set_peer(peer.clone()) {
            // Teardown landed while the connect was in flight; it found an
            // empty peer slot, so this handle is ours to close.
            warn!(call_sid, "session ended during AI peer connect, closing peer");
            if let Err(e) = peer.close().await {
                warn!(call_sid, "error closing AI peer: {e}");
            }
            return Ok(());
        }
        if session.lifecycle() == Lifecycle::Created {
            session.set_lifecycle(Lifecycle::AwaitingMedia);
        }
        info!(call_sid, business_id = %session.business_id, "AI peer initialized");
        Ok(())
    }

    /// Tear the session down. Idempotent: ending an already-ended session
    /// is a silent no-op, with no double-close and no second lifecycle log.
    /// The session is unreachable via [`SessionRegistry::get`] the moment
    /// this returns, even though socket cleanup may still be in flight.
    pub async fn end_session(&self, call_sid: &str, reason: EndReason) {
        let Some((_, session)) = self.sessions.remove(call_sid) else {
            debug!(call_sid, "end_session on unknown or already-ended call");
            return;
        };

        info!(
            call_sid,
            business_id = %session.business_id,
            reason = %reason,
            duration_ms = session.created_at.elapsed().as_millis() as u64,
            "call session ended"
        );

        let (transport, peer) = session.detach_for_teardown();

        if let Some(tx) = transport {
            let _ = tx.try_send(OutboundFrame::Close);
        }
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!(call_sid, "error closing AI peer: {e}");
            }
        }
        session.set_lifecycle(Lifecycle::Ended);
    }

    /// Number of active sessions. Never blocks on external calls.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// End every session, bounded by the grace period. Used on process
    /// termination.
    pub async fn shutdown(&self, grace: Duration) {
        let call_sids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if call_sids.is_empty() {
            return;
        }

        info!(count = call_sids.len(), "ending all sessions for shutdown");
        let drain = async {
            for call_sid in &call_sids {
                self.end_session(call_sid, EndReason::ServerShutdown).await;
            }
        };
        if timeout(grace, drain).await.is_err() {
            warn!("shutdown grace period elapsed with sessions still closing");
            self.sessions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::core::peer::{
        ConnectionState, PeerAudioCallback, PeerError, PeerEventCallback,
    };

    struct MockPeer {
        connected: AtomicBool,
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AiPeer for MockPeer {
        async fn connect(&self) -> PeerResult<()> {
            // Widen the race window so concurrent init attempts overlap.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> PeerResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn connection_state(&self) -> ConnectionState {
            if self.is_ready() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }

        async fn send_audio(&self, _audio: Bytes) -> PeerResult<()> {
            Ok(())
        }

        fn on_audio(&self, _callback: PeerAudioCallback) {}

        fn on_event(&self, _callback: PeerEventCallback) {}

        fn sample_rate(&self) -> u32 {
            24000
        }
    }

    fn mock_registry() -> (Arc<SessionRegistry>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let factory: PeerFactory = Arc::new(move |_, _| {
            Ok(Arc::new(MockPeer {
                connected: AtomicBool::new(false),
                connects: counter.clone(),
            }) as Arc<dyn AiPeer>)
        });
        let registry = Arc::new(SessionRegistry::with_peer_factory(
            RegistryConfig::default(),
            factory,
        ));
        (registry, connects)
    }

    fn create(registry: &SessionRegistry, call_sid: &str) -> Arc<CallSession> {
        registry
            .create_session(call_sid, "biz-1", "agent-1", "+15550001111", "+15550002222")
            .expect("create should succeed")
    }

    #[tokio::test]
    async fn test_duplicate_creation_rejected() {
        let (registry, _) = mock_registry();
        create(&registry, "CA123");
        assert!(matches!(
            registry.create_session("CA123", "b", "a", "f", "t"),
            Err(SessionError::Duplicate(_))
        ));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_single_winner() {
        let (registry, _) = mock_registry();

        let r1 = registry.clone();
        let r2 = registry.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { r1.create_session("CA123", "b", "a", "f", "t").is_ok() }),
            tokio::spawn(async move { r2.create_session("CA123", "b", "a", "f", "t").is_ok() }),
        );

        let wins = [a.unwrap(), b.unwrap()].iter().filter(|&&w| w).count();
        assert_eq!(wins, 1);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_call() {
        let (registry, _) = mock_registry();
        assert!(matches!(
            registry.get("CAxyz"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dual_prewarm_single_connection() {
        let (registry, connects) = mock_registry();
        create(&registry, "CA123");

        // Intake pre-warm and media-handler fallback race each other.
        let r1 = registry.clone();
        let r2 = registry.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { r1.init_ai_peer("CA123").await }),
            tokio::spawn(async move { r2.init_ai_peer("CA123").await }),
        );
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());

        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_marks_session_awaiting_media() {
        let (registry, _) = mock_registry();
        let session = create(&registry, "CA123");
        registry.init_ai_peer("CA123").await.unwrap();
        assert_eq!(session.lifecycle(), Lifecycle::AwaitingMedia);
        assert!(session.peer().is_some());
    }

    #[tokio::test]
    async fn test_init_failure_propagates() {
        let factory: PeerFactory = Arc::new(|_, _| {
            Err(PeerError::ConnectionFailed("refused".to_string()))
        });
        let registry = Arc::new(SessionRegistry::with_peer_factory(
            RegistryConfig::default(),
            factory,
        ));
        create(&registry, "CA123");

        let result = registry.init_ai_peer("CA123").await;
        assert!(matches!(result, Err(SessionError::PeerInit(_))));
        // The session is left for the caller to end with reason `failed`.
        assert!(registry.get("CA123").is_ok());
    }

    #[tokio::test]
    async fn test_teardown_racing_init_closes_peer() {
        let peer = Arc::new(MockPeer {
            connected: AtomicBool::new(false),
            connects: Arc::new(AtomicUsize::new(0)),
        });
        let handle = peer.clone();
        let factory: PeerFactory =
            Arc::new(move |_, _| Ok(handle.clone() as Arc<dyn AiPeer>));
        let registry = Arc::new(SessionRegistry::with_peer_factory(
            RegistryConfig::default(),
            factory,
        ));
        create(&registry, "CA123");

        // End the session while the peer connect is still in flight.
        let r = registry.clone();
        let init = tokio::spawn(async move { r.init_ai_peer("CA123").await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.end_session("CA123", EndReason::CallerHangup).await;

        init.await.unwrap().unwrap();
        assert!(
            !peer.is_ready(),
            "AI peer left connected after its session ended"
        );
        assert!(registry.get("CA123").is_err());
    }

    #[tokio::test]
    async fn test_attach_transport_refused_after_teardown_starts() {
        let (registry, _) = mock_registry();
        let session = create(&registry, "CA123");
        session.detach_for_teardown();

        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        assert!(!registry.attach_transport("CA123", tx, "MZ001").unwrap());
    }

    #[tokio::test]
    async fn test_end_session_idempotent() {
        let (registry, _) = mock_registry();
        create(&registry, "CA123");
        registry.init_ai_peer("CA123").await.unwrap();

        registry.end_session("CA123", EndReason::Completed).await;
        assert!(registry.get("CA123").is_err());
        assert_eq!(registry.active_count(), 0);

        // Second end is a no-op, not a panic or double-close.
        registry.end_session("CA123", EndReason::Completed).await;
    }

    #[tokio::test]
    async fn test_attach_transport_unknown_call() {
        let (registry, _) = mock_registry();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        assert!(matches!(
            registry.attach_transport("CAxyz", tx, "MZ001"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_transport_sends_close_on_end() {
        let (registry, _) = mock_registry();
        create(&registry, "CA123");
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.attach_transport("CA123", tx, "MZ001").unwrap();

        registry.end_session("CA123", EndReason::CallerHangup).await;
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Close)));
    }

    #[tokio::test]
    async fn test_shutdown_ends_everything() {
        let (registry, _) = mock_registry();
        create(&registry, "CA1");
        create(&registry, "CA2");
        create(&registry, "CA3");

        registry.shutdown(Duration::from_secs(5)).await;
        assert_eq!(registry.active_count(), 0);
    }
}

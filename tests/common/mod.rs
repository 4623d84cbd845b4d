//! Shared helpers for integration tests: a recording AI peer, state
//! construction with an injected peer factory, and an ephemeral server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use callbridge::config::ServerConfig;
use callbridge::core::health::{AlertConfig, AlertManager, HealthMonitor, TracingEventLog};
use callbridge::core::peer::{
    AiPeer, ConnectionState, PeerAudioCallback, PeerEventCallback, PeerResult,
};
use callbridge::core::session::{PeerFactory, RegistryConfig, SessionRegistry};
use callbridge::routes;
use callbridge::state::AppState;

/// AI peer double that records every frame of audio it is sent.
pub struct RecordingPeer {
    connected: AtomicBool,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl AiPeer for RecordingPeer {
    async fn connect(&self) -> PeerResult<()> {
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

    async fn send_audio(&self, audio: Bytes) -> PeerResult<()> {
        self.frames.lock().push(audio.to_vec());
        Ok(())
    }

    fn on_audio(&self, _callback: PeerAudioCallback) {}

    fn on_event(&self, _callback: PeerEventCallback) {}

    fn sample_rate(&self) -> u32 {
        24000
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_grace_seconds: 1,
        ai_provider: "openai".to_string(),
        openai_api_key: Some("sk-test".to_string()),
        ai_model: None,
        ai_voice: None,
        ai_instructions: None,
        twilio_account_sid: None,
        twilio_auth_token: None,
        batch_target_bytes: 4800,
        batch_max_latency_ms: 50,
        resampler_quality: 2,
        event_log_url: None,
        alert_webhook_url: None,
        alert_email_to: None,
        mail_gateway_url: None,
        alert_min_severity: "warning".to_string(),
        intake_shared_secret: None,
        cors_allowed_origins: "*".to_string(),
    }
}

/// Application state with a recording peer injected in place of the real
/// AI client. Returns the recorded frames alongside.
pub fn test_state(config: ServerConfig) -> (AppState, Arc<Mutex<Vec<Vec<u8>>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let recorded = frames.clone();
    let factory: PeerFactory = Arc::new(move |_, _| {
        Ok(Arc::new(RecordingPeer {
            connected: AtomicBool::new(false),
            frames: recorded.clone(),
        }) as Arc<dyn AiPeer>)
    });
    let registry = Arc::new(SessionRegistry::with_peer_factory(
        RegistryConfig::default(),
        factory,
    ));
    let event_log = Arc::new(TracingEventLog);
    let alerts = Arc::new(AlertManager::new(event_log.clone(), AlertConfig::default()));
    let health = Arc::new(HealthMonitor::new(
        registry.clone(),
        event_log,
        config.ai_configured(),
        config.telephony_configured(),
    ));
    let state = AppState {
        config: Arc::new(config),
        registry,
        alerts,
        health,
    };
    (state, frames)
}

/// Serve the full application router on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = routes::create_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

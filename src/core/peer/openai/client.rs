//! OpenAI Realtime API peer client.
//!
//! Implements [`AiPeer`] over the Realtime WebSocket protocol: PCM16 frames
//! are base64-encoded into `input_audio_buffer.append` events, synthesized
//! audio arrives as `response.audio.delta` events. Server-side VAD and turn
//! handling are left at the API defaults; the bridge only carries audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, trace, warn};

use super::config::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimeModel, RealtimeVoice};
use super::messages::{ClientEvent, ServerEvent, SessionConfig};
use crate::core::peer::{
    AiPeer, ConnectionState, PeerAudioCallback, PeerConfig, PeerError, PeerEvent,
    PeerEventCallback, PeerResult,
};

/// Channel capacity for outbound WebSocket events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Commands routed to the connection task.
enum Outbound {
    Event(ClientEvent),
    Close,
}

/// OpenAI Realtime peer client.
///
/// All mutable state is behind `Arc` so it can be shared with the spawned
/// connection task; the `connected` flag is an `AtomicBool` for lock-free
/// checks on the audio hot path.
pub struct RealtimePeer {
    config: PeerConfig,
    model: RealtimeModel,
    voice: RealtimeVoice,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    ws_sender: Mutex<Option<mpsc::Sender<Outbound>>>,
    audio_callback: Arc<Mutex<Option<PeerAudioCallback>>>,
    event_callback: Arc<Mutex<Option<PeerEventCallback>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimePeer {
    pub fn new(config: PeerConfig) -> PeerResult<Self> {
        if config.api_key.is_empty() {
            return Err(PeerError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = RealtimeModel::from_str_or_default(&config.model);
        let voice = config
            .voice
            .as_deref()
            .map(RealtimeVoice::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            model,
            voice,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            ws_sender: Mutex::new(None),
            audio_callback: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            connection_handle: Mutex::new(None),
        })
    }

    fn build_ws_url(&self) -> String {
        format!("{}?model={}", OPENAI_REALTIME_URL, self.model.as_str())
    }

    fn build_request(&self, url: &str) -> PeerResult<http::Request<()>> {
        http::Request::builder()
            .uri(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", "api.openai.com")
            .body(())
            .map_err(|e| PeerError::ConnectionFailed(e.to_string()))
    }

    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
        }
    }

    async fn handle_server_event(
        event: ServerEvent,
        audio_cb: &Arc<Mutex<Option<PeerAudioCallback>>>,
        event_cb: &Arc<Mutex<Option<PeerEventCallback>>>,
    ) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(remote_session = %session.id, "AI peer session created");
                let cb = event_cb.lock().clone();
                if let Some(cb) = cb {
                    cb(PeerEvent::Ready).await;
                }
            }
            ServerEvent::SessionUpdated => {
                debug!("AI peer session updated");
            }
            ServerEvent::ResponseAudioDelta { delta } => match BASE64_STANDARD.decode(&delta) {
                Ok(audio) => {
                    let cb = audio_cb.lock().clone();
                    if let Some(cb) = cb {
                        cb(Bytes::from(audio)).await;
                    }
                }
                Err(e) => {
                    warn!("failed to decode AI peer audio delta: {e}");
                }
            },
            ServerEvent::ResponseAudioDone | ServerEvent::ResponseDone => {
                trace!("AI peer response finished");
            }
            ServerEvent::Error { error } => {
                let message = error.message.unwrap_or_else(|| "unknown".to_string());
                warn!(
                    error_type = error.error_type.as_deref().unwrap_or("unknown"),
                    "AI peer error: {message}"
                );
                let cb = event_cb.lock().clone();
                if let Some(cb) = cb {
                    cb(PeerEvent::Error(message)).await;
                }
            }
            ServerEvent::Other => {
                trace!("unhandled AI peer event");
            }
        }
    }
}

#[async_trait]
impl AiPeer for RealtimePeer {
    async fn connect(&self) -> PeerResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        *self.state.write() = ConnectionState::Connecting;

        let url = self.build_ws_url();
        let request = self.build_request(&url)?;

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(request).await.map_err(|e| {
                *self.state.write() = ConnectionState::Failed;
                PeerError::ConnectionFailed(e.to_string())
            })?;

        info!(model = self.model.as_str(), "connected to AI peer");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Outbound>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock() = Some(tx.clone());

        let audio_cb = self.audio_callback.clone();
        let event_cb = self.event_callback.clone();
        let state = self.state.clone();
        let connected = self.connected.clone();

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(outbound) = rx.recv() => {
                        match outbound {
                            Outbound::Event(event) => {
                                let json = match serde_json::to_string(&event) {
                                    Ok(j) => j,
                                    Err(e) => {
                                        warn!("failed to serialize peer event: {e}");
                                        continue;
                                    }
                                };
                                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                    warn!("failed to send to AI peer: {e}");
                                    break;
                                }
                            }
                            Outbound::Close => {
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    Some(msg) = ws_stream.next() => {
                        match msg {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        Self::handle_server_event(event, &audio_cb, &event_cb).await;
                                    }
                                    Err(e) => {
                                        warn!("failed to parse AI peer event: {e}");
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => {
                                info!("AI peer closed the connection");
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("failed to send pong to AI peer: {e}");
                                }
                            }
                            Err(e) => {
                                warn!("AI peer websocket error: {e}");
                                let cb = event_cb.lock().clone();
                                if let Some(cb) = cb {
                                    cb(PeerEvent::Error(e.to_string())).await;
                                }
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            connected.store(false, Ordering::SeqCst);
            *state.write() = ConnectionState::Disconnected;
            let cb = event_cb.lock().clone();
            if let Some(cb) = cb {
                cb(PeerEvent::Closed).await;
            }
        });
        *self.connection_handle.lock() = Some(handle);

        // Configure voice, instructions, and audio format up front.
        let session_update = ClientEvent::SessionUpdate {
            session: self.build_session_config(),
        };
        tx.send(Outbound::Event(session_update))
            .await
            .map_err(|_| PeerError::NotConnected)?;

        Ok(())
    }

    async fn close(&self) -> PeerResult<()> {
        let sender = self.ws_sender.lock().take();
        if let Some(tx) = sender {
            let _ = tx.send(Outbound::Close).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;

        let handle = self.connection_handle.lock().take();
        if let Some(handle) = handle {
            // Give the task a moment to flush the close frame.
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn send_audio(&self, audio: Bytes) -> PeerResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PeerError::NotConnected);
        }

        let event = ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(&audio),
        };

        let tx = self.ws_sender.lock().clone();
        match tx {
            Some(tx) => tx
                .send(Outbound::Event(event))
                .await
                .map_err(|_| PeerError::NotConnected),
            None => Err(PeerError::NotConnected),
        }
    }

    fn on_audio(&self, callback: PeerAudioCallback) {
        *self.audio_callback.lock() = Some(callback);
    }

    fn on_event(&self, callback: PeerEventCallback) {
        *self.event_callback.lock() = Some(callback);
    }

    fn sample_rate(&self) -> u32 {
        OPENAI_REALTIME_SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let result = RealtimePeer::new(PeerConfig::default());
        assert!(matches!(result, Err(PeerError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_ws_url_includes_model() {
        let peer = RealtimePeer::new(PeerConfig {
            api_key: "k".to_string(),
            model: "gpt-4o-mini-realtime-preview".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            peer.build_ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_request_carries_auth_headers() {
        let peer = RealtimePeer::new(PeerConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        })
        .unwrap();
        let request = peer.build_request(&peer.build_ws_url()).unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(request.headers().get("OpenAI-Beta").unwrap(), "realtime=v1");
    }

    #[tokio::test]
    async fn test_send_audio_before_connect_fails() {
        let peer = RealtimePeer::new(PeerConfig {
            api_key: "k".to_string(),
            ..Default::default()
        })
        .unwrap();
        let result = peer.send_audio(Bytes::from_static(&[0u8; 4])).await;
        assert!(matches!(result, Err(PeerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_before_connect_is_noop() {
        let peer = RealtimePeer::new(PeerConfig {
            api_key: "k".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(peer.close().await.is_ok());
        assert!(!peer.is_ready());
        assert_eq!(peer.connection_state(), ConnectionState::Disconnected);
    }
}

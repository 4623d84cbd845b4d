//! Telephony media-stream WebSocket handler.
//!
//! Terminates the provider's event-tagged streaming protocol and drives the
//! session through it. Each connection runs an explicit state machine:
//! `AwaitingStart` until a valid `start` arrives, `Streaming` while audio
//! flows, `Ending` once either side is done. Out-of-order events are
//! dropped, never buffered; audio ordering on the wire is the ordering the
//! AI peer hears.

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::health::Alert;
use crate::core::session::{CallSession, EndReason, OutboundFrame};
use crate::state::AppState;

use super::messages::{MediaEvent, OutgoingEvent, OutgoingPayload, StartFrame};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (64 KB; media fragments are ~200 bytes)
const MAX_WS_FRAME_SIZE: usize = 64 * 1024;

/// Maximum WebSocket message size (64 KB)
const MAX_WS_MESSAGE_SIZE: usize = 64 * 1024;

/// Close code for protocol violations (RFC 6455 "policy violation").
const POLICY_VIOLATION: u16 = 1008;

/// Bound on waiting for queued outgoing frames after the receive loop ends.
const SENDER_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Frames routed to the socket's sender task.
enum MediaRoute {
    /// Pre-serialized outgoing JSON.
    Text(String),
    /// Close the socket, optionally with a close frame.
    Close(Option<CloseFrame>),
}

/// Per-connection state machine. Transitions happen only inside the event
/// dispatch below; no connection-scoped booleans anywhere else.
enum StreamState {
    /// Socket accepted, no `start` seen yet.
    AwaitingStart,
    /// `start` validated and the session attached.
    Streaming(Arc<CallSession>),
    /// Teardown already handed to the registry.
    Ending,
}

/// Media-stream WebSocket handler.
///
/// Upgrades the HTTP connection for the telephony provider's media stream.
pub async fn media_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    debug!("media stream upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: AppState) {
    info!("media stream socket established");

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<MediaRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing frames
    let sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let should_close = matches!(route, MediaRoute::Close(_));

            let result = match route {
                MediaRoute::Text(json) => sender.send(Message::Text(json.into())).await,
                MediaRoute::Close(frame) => {
                    info!("closing media stream socket");
                    sender.send(Message::Close(frame)).await
                }
            };

            if let Err(e) = result {
                debug!("failed to send media stream frame: {e}");
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let mut stream = StreamState::AwaitingStart;

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(msg) => {
                if !process_media_message(msg, &mut stream, &route_tx, &state).await {
                    break;
                }
            }
            Err(e) => {
                warn!("media stream socket error: {e}");
                break;
            }
        }
    }

    // Socket gone while the session was still live means the caller side
    // hung up; everything else already ran its teardown.
    if let StreamState::Streaming(session) = &stream {
        state
            .registry
            .end_session(&session.call_sid, EndReason::CallerHangup)
            .await;
    }

    // Queued frames (including a close frame for a rejected stream) must
    // reach the wire; dropping our sender ends the task once they have.
    drop(route_tx);
    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, sender_task)
        .await
        .is_err()
    {
        debug!("media stream sender task did not drain in time");
    }
    info!("media stream socket terminated");
}

/// Process one incoming WebSocket message. Returns false to stop the
/// receive loop.
async fn process_media_message(
    msg: Message,
    stream: &mut StreamState,
    route_tx: &mpsc::Sender<MediaRoute>,
    state: &AppState,
) -> bool {
    match msg {
        Message::Text(text) => {
            let event: MediaEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("unparseable media stream event dropped: {e}");
                    return true;
                }
            };
            dispatch_media_event(event, stream, route_tx, state).await
        }
        Message::Binary(_) => {
            debug!("binary frame on media stream ignored");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("media stream closed by provider");
            false
        }
    }
}

async fn dispatch_media_event(
    event: MediaEvent,
    stream: &mut StreamState,
    route_tx: &mpsc::Sender<MediaRoute>,
    state: &AppState,
) -> bool {
    match event {
        MediaEvent::Connected => {
            debug!("media stream protocol preamble received");
            true
        }
        MediaEvent::Start { start } => handle_start(start, stream, route_tx, state).await,
        MediaEvent::Media { media } => {
            let StreamState::Streaming(session) = stream else {
                // Ordering is part of the audio contract; a frame we cannot
                // place in order is dropped, never held for later.
                warn!("media event before start, fragment dropped");
                return true;
            };

            match BASE64.decode(&media.payload) {
                Ok(mulaw) => session.forward_inbound(&mulaw).await,
                Err(e) => {
                    warn!(call_sid = %session.call_sid, "undecodable media payload dropped: {e}");
                }
            }
            true
        }
        MediaEvent::Stop => {
            if let StreamState::Streaming(session) = stream {
                info!(call_sid = %session.call_sid, "media stream stop received");
                state
                    .registry
                    .end_session(&session.call_sid, EndReason::Completed)
                    .await;
                *stream = StreamState::Ending;
            } else {
                debug!("stop event on idle media stream");
            }
            false
        }
        MediaEvent::Mark { mark } => {
            // Acknowledgement only.
            debug!(name = %mark.name, "media stream mark received");
            true
        }
        MediaEvent::Other => {
            debug!("unrecognized media stream event ignored");
            true
        }
    }
}

/// Validate a `start` event, bind the socket to its session, and trigger
/// the AI-peer init fallback.
async fn handle_start(
    start: StartFrame,
    stream: &mut StreamState,
    route_tx: &mpsc::Sender<MediaRoute>,
    state: &AppState,
) -> bool {
    if !matches!(stream, StreamState::AwaitingStart) {
        warn!("duplicate start event ignored");
        return true;
    }

    let Some(call_sid) = start.call_sid else {
        warn!("start event without call identifier, closing socket");
        let _ = route_tx
            .send(MediaRoute::Close(Some(CloseFrame {
                code: POLICY_VIOLATION,
                reason: "missing call identifier".into(),
            })))
            .await;
        return false;
    };

    // The session must already exist, created by the intake router. A
    // stream with no session is orphaned or unauthorized; no session is
    // created for it and no AI connection is attempted.
    let session = match state.registry.get(&call_sid) {
        Ok(session) => session,
        Err(_) => {
            warn!(call_sid, "media stream for unknown call, closing socket");
            let _ = route_tx.send(MediaRoute::Close(None)).await;
            return false;
        }
    };

    // Bridge session-level outbound frames onto this socket's sender task,
    // wrapping audio in the provider's media envelope.
    let (transport_tx, mut transport_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);
    let stream_sid = start.stream_sid.clone();
    let route = route_tx.clone();
    tokio::spawn(async move {
        while let Some(frame) = transport_rx.recv().await {
            match frame {
                OutboundFrame::Media(mulaw) => {
                    let message = OutgoingEvent::Media {
                        stream_sid: stream_sid.clone(),
                        media: OutgoingPayload {
                            payload: BASE64.encode(&mulaw),
                        },
                    };
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            if route.send(MediaRoute::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("failed to serialize outgoing media frame: {e}"),
                    }
                }
                OutboundFrame::Close => {
                    let _ = route.send(MediaRoute::Close(None)).await;
                    break;
                }
            }
        }
    });

    match state
        .registry
        .attach_transport(&call_sid, transport_tx, &start.stream_sid)
    {
        Ok(true) => {}
        // Lost a race with teardown between get and attach; the stream
        // must not enter the streaming state on a dying session.
        Ok(false) | Err(_) => {
            let _ = route_tx.send(MediaRoute::Close(None)).await;
            return false;
        }
    }

    // Fallback for calls whose intake-time pre-warm has not finished or
    // never ran. Runs in the background so inbound frames keep draining;
    // frames arriving before the peer is up are dropped by the session.
    if session.peer().is_none() {
        let registry = state.registry.clone();
        let alerts = state.alerts.clone();
        let business_id = session.business_id.clone();
        let init_call_sid = call_sid.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.init_ai_peer(&init_call_sid).await {
                warn!(call_sid = %init_call_sid, "AI peer init fallback failed: {e}");
                alerts.dispatch(
                    Alert::critical("AI peer initialization failed", &e.to_string())
                        .with_business_id(&business_id)
                        .with_metadata(json!({ "call_sid": init_call_sid })),
                );
                registry.end_session(&init_call_sid, EndReason::Failed).await;
            }
        });
    }

    info!(call_sid, stream_sid = %start.stream_sid, "media stream started");
    *stream = StreamState::Streaming(session);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use crate::config::ServerConfig;
    use crate::core::health::{AlertConfig, AlertManager, HealthMonitor, TracingEventLog};
    use crate::core::peer::{
        AiPeer, ConnectionState, PeerAudioCallback, PeerEventCallback, PeerResult,
    };
    use crate::core::session::{PeerFactory, RegistryConfig, SessionRegistry};

    struct RecordingPeer {
        connected: AtomicBool,
        frames: Arc<Mutex<Vec<usize>>>,
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
            ConnectionState::Connected
        }

        async fn send_audio(&self, audio: Bytes) -> PeerResult<()> {
            self.frames.lock().push(audio.len());
            Ok(())
        }

        fn on_audio(&self, _callback: PeerAudioCallback) {}

        fn on_event(&self, _callback: PeerEventCallback) {}

        fn sample_rate(&self) -> u32 {
            24000
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_grace_seconds: 1,
            ai_provider: "openai".to_string(),
            openai_api_key: None,
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

    fn test_state() -> (AppState, Arc<Mutex<Vec<usize>>>) {
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
        let health = Arc::new(HealthMonitor::new(registry.clone(), event_log, false, false));
        let state = AppState {
            config: Arc::new(test_config()),
            registry,
            alerts,
            health,
        };
        (state, frames)
    }

    async fn wait_converter_ready(session: &CallSession) {
        for _ in 0..500 {
            if session.converter().is_ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("resampler engine never became ready");
    }

    fn start_json(call_sid: &str) -> Message {
        Message::Text(
            format!(
                r#"{{"event":"start","streamSid":"MZ001","start":{{"callSid":"{call_sid}","streamSid":"MZ001"}}}}"#
            )
            .into(),
        )
    }

    fn media_json(payload: &[u8]) -> Message {
        Message::Text(
            format!(
                r#"{{"event":"media","streamSid":"MZ001","media":{{"track":"inbound","payload":"{}"}}}}"#,
                BASE64.encode(payload)
            )
            .into(),
        )
    }

    #[tokio::test]
    async fn test_media_before_start_is_dropped() {
        let (state, frames) = test_state();
        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;

        let keep_going =
            process_media_message(media_json(&[0xFF; 160]), &mut stream, &route_tx, &state).await;

        assert!(keep_going);
        assert!(matches!(stream, StreamState::AwaitingStart));
        assert!(frames.lock().is_empty());
        assert!(route_rx.try_recv().is_err());
        assert_eq!(state.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_start_without_call_sid_closes_with_policy_violation() {
        let (state, _) = test_state();
        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;

        let msg = Message::Text(r#"{"event":"start","start":{"streamSid":"MZ001"}}"#.into());
        let keep_going = process_media_message(msg, &mut stream, &route_tx, &state).await;

        assert!(!keep_going);
        match route_rx.recv().await {
            Some(MediaRoute::Close(Some(frame))) => assert_eq!(frame.code, POLICY_VIOLATION),
            _ => panic!("expected policy-violation close frame"),
        }
    }

    #[tokio::test]
    async fn test_orphaned_stream_is_closed() {
        let (state, _) = test_state();
        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;

        let keep_going =
            process_media_message(start_json("CAxyz"), &mut stream, &route_tx, &state).await;

        assert!(!keep_going);
        assert!(matches!(route_rx.recv().await, Some(MediaRoute::Close(None))));
        // No session was created for the orphan.
        assert_eq!(state.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_start_on_ending_session_closes_socket() {
        let (state, _) = test_state();
        let session = state
            .registry
            .create_session("CA123", "biz-1", "agent-1", "f", "t")
            .unwrap();
        session.detach_for_teardown();

        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;
        let keep_going =
            process_media_message(start_json("CA123"), &mut stream, &route_tx, &state).await;

        // A session already tearing down never reaches the streaming state.
        assert!(!keep_going);
        assert!(matches!(stream, StreamState::AwaitingStart));
        assert!(matches!(route_rx.recv().await, Some(MediaRoute::Close(None))));
    }

    #[tokio::test]
    async fn test_happy_path_start_media_stop() {
        let (state, frames) = test_state();
        let session = state
            .registry
            .create_session("CA123", "biz-1", "agent-1", "+15550001111", "+15550002222")
            .unwrap();
        state.registry.init_ai_peer("CA123").await.unwrap();
        wait_converter_ready(&session).await;

        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;

        assert!(process_media_message(start_json("CA123"), &mut stream, &route_tx, &state).await);
        assert!(matches!(stream, StreamState::Streaming(_)));

        // 160 μ-law bytes decode to 320 PCM bytes at 8kHz, upsampled 3x.
        assert!(
            process_media_message(media_json(&[0xFF; 160]), &mut stream, &route_tx, &state).await
        );
        assert_eq!(frames.lock().as_slice(), &[960]);

        let keep_going =
            process_media_message(Message::Text(r#"{"event":"stop"}"#.into()), &mut stream, &route_tx, &state)
                .await;
        assert!(!keep_going);
        assert!(state.registry.get("CA123").is_err());
        // Teardown routes a close through the socket's sender task.
        match tokio::time::timeout(Duration::from_secs(1), route_rx.recv()).await {
            Ok(Some(MediaRoute::Close(_))) => {}
            other => panic!("expected close route, got {:?}", other.map(|o| o.is_some())),
        }
    }

    #[tokio::test]
    async fn test_per_fragment_fault_isolation() {
        let (state, frames) = test_state();
        let session = state
            .registry
            .create_session("CA123", "biz-1", "agent-1", "f", "t")
            .unwrap();
        state.registry.init_ai_peer("CA123").await.unwrap();
        wait_converter_ready(&session).await;

        let (route_tx, _route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;
        assert!(process_media_message(start_json("CA123"), &mut stream, &route_tx, &state).await);

        // A fragment with invalid base64 is dropped.
        let bad = Message::Text(
            r#"{"event":"media","media":{"payload":"not-base64!!"}}"#.into(),
        );
        assert!(process_media_message(bad, &mut stream, &route_tx, &state).await);
        assert!(frames.lock().is_empty());

        // The next fragment still flows.
        assert!(
            process_media_message(media_json(&[0xFF; 160]), &mut stream, &route_tx, &state).await
        );
        assert_eq!(frames.lock().as_slice(), &[960]);
    }

    #[tokio::test]
    async fn test_mark_is_log_only() {
        let (state, _) = test_state();
        let (route_tx, mut route_rx) = mpsc::channel(16);
        let mut stream = StreamState::AwaitingStart;

        let msg = Message::Text(r#"{"event":"mark","mark":{"name":"greeting"}}"#.into());
        assert!(process_media_message(msg, &mut stream, &route_tx, &state).await);
        assert!(route_rx.try_recv().is_err());
    }
}

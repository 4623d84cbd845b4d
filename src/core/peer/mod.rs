//! Streaming AI peer abstraction.
//!
//! The bridge treats the speech AI endpoint as a duplex audio pipe plus a
//! close operation: raw PCM16 frames go in, synthesized PCM16 frames and
//! lifecycle events come out. Everything provider-specific lives behind the
//! [`AiPeer`] trait so the session registry never names a concrete client.

pub mod openai;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimePeer};

/// Errors from AI peer operations.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Connection to the peer failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("not connected")]
    NotConnected,
}

/// Result type for peer operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// Configuration handed to a peer client at creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (provider-specific)
    #[serde(default)]
    pub model: String,

    /// Voice for synthesized output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Connection state of a peer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the peer
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle events surfaced from the peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote session established and configured.
    Ready,
    /// Connection closed (by either side).
    Closed,
    /// Peer-side error; the connection may or may not survive it.
    Error(String),
}

/// Callback for synthesized audio frames (PCM16 little-endian, mono, at the
/// peer's native sample rate).
pub type PeerAudioCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for peer lifecycle events.
pub type PeerEventCallback =
    Arc<dyn Fn(PeerEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Duplex audio pipe to a streaming speech AI endpoint.
#[async_trait]
pub trait AiPeer: Send + Sync {
    /// Connect and configure the remote session. Idempotent: connecting an
    /// already-connected peer is a no-op.
    async fn connect(&self) -> PeerResult<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> PeerResult<()>;

    /// Whether the peer is connected and accepting audio.
    fn is_ready(&self) -> bool;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Send one audio frame toward the AI (PCM16 little-endian, mono, at
    /// the peer's native sample rate).
    async fn send_audio(&self, audio: Bytes) -> PeerResult<()>;

    /// Register the callback for synthesized audio. Must be registered
    /// before `connect` to avoid missing early frames.
    fn on_audio(&self, callback: PeerAudioCallback);

    /// Register the callback for lifecycle events.
    fn on_event(&self, callback: PeerEventCallback);

    /// Native sample rate of the peer's audio, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Factory for peer clients, keyed by provider name.
pub fn create_peer(provider: &str, config: PeerConfig) -> PeerResult<Arc<dyn AiPeer>> {
    match provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(RealtimePeer::new(config)?)),
        other => Err(PeerError::InvalidConfiguration(format!(
            "unsupported AI peer provider: {other} (supported: openai)"
        ))),
    }
}

/// Provider names accepted by [`create_peer`].
pub fn supported_peer_providers() -> Vec<&'static str> {
    vec!["openai"]
}

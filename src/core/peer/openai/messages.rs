//! OpenAI Realtime API WebSocket event types.
//!
//! Client events (sent to the server):
//! - `session.update` - configure voice, instructions, audio format
//! - `input_audio_buffer.append` - append base64 audio to the input buffer
//!
//! Server events (received):
//! - `session.created` / `session.updated`
//! - `response.audio.delta` - synthesized audio chunk (base64 PCM16)
//! - `response.audio.done` / `response.done`
//! - `error`
//!
//! Only the events the bridge acts on are modeled; everything else is
//! deserialized into `Other` and traced.

use serde::{Deserialize, Serialize};

/// Session configuration payload for `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
}

/// Events sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },
}

/// Remote session descriptor inside `session.created`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    /// Provider-assigned session id
    pub id: String,
}

/// Error detail inside an `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
}

/// Events received from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Remote session descriptor
        session: RemoteSession,
    },

    /// Session configuration updated
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Synthesized audio chunk
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        /// Base64-encoded PCM16 audio
        delta: String,
    },

    /// Audio generation for one response finished
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error detail
        error: ErrorDetail,
    },

    /// Any event the bridge does not act on
    #[serde(other)]
    Other,
}

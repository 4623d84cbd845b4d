//! Wire messages for the telephony media stream.
//!
//! The telephony provider speaks an event-tagged JSON protocol over the
//! media WebSocket. Incoming frames carry extra bookkeeping fields
//! (sequence numbers, top-level stream ids) that the bridge does not use;
//! serde ignores them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Incoming media-stream events, tagged by the `event` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaEvent {
    /// Protocol preamble sent right after the socket opens.
    Connected,
    /// Stream metadata; the first meaningful event on every stream.
    Start { start: StartFrame },
    /// One fragment of inbound call audio.
    Media { media: MediaPayload },
    /// The stream is over.
    Stop,
    /// Playback acknowledgement for a previously sent mark.
    Mark { mark: MarkFrame },
    /// Forward-compatible catch-all for event types this bridge ignores.
    #[serde(other)]
    Other,
}

/// Payload of a `start` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFrame {
    /// The call this stream belongs to. Required by the bridge; a stream
    /// without it cannot be linked to a session.
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Provider-assigned stream identifier, echoed on outgoing frames.
    #[serde(default)]
    pub stream_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Negotiated audio format from the `start` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Payload of a `media` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    /// Base64-encoded μ-law audio.
    pub payload: String,
}

/// Payload of a `mark` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkFrame {
    #[serde(default)]
    pub name: String,
}

/// Outgoing media-stream messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutgoingEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutgoingPayload,
    },
}

/// Base64 μ-law payload of an outgoing `media` message.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingPayload {
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ001",
            "start": {
                "accountSid": "AC123",
                "callSid": "CA123",
                "streamSid": "MZ001",
                "tracks": ["inbound"],
                "mediaFormat": {
                    "encoding": "audio/x-mulaw",
                    "sampleRate": 8000,
                    "channels": 1
                },
                "customParameters": { "businessId": "biz-1" }
            }
        }"#;
        let event: MediaEvent = serde_json::from_str(json).unwrap();
        match event {
            MediaEvent::Start { start } => {
                assert_eq!(start.call_sid.as_deref(), Some("CA123"));
                assert_eq!(start.stream_sid, "MZ001");
                let format = start.media_format.unwrap();
                assert_eq!(format.sample_rate, 8000);
                assert_eq!(
                    start.custom_parameters.get("businessId").map(String::as_str),
                    Some("biz-1")
                );
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_start_without_call_sid() {
        let json = r#"{"event":"start","start":{"streamSid":"MZ001"}}"#;
        let event: MediaEvent = serde_json::from_str(json).unwrap();
        match event {
            MediaEvent::Start { start } => assert!(start.call_sid.is_none()),
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_event() {
        let json = r#"{
            "event": "media",
            "sequenceNumber": "3",
            "streamSid": "MZ001",
            "media": { "track": "inbound", "chunk": "2", "timestamp": "5", "payload": "AAAA" }
        }"#;
        let event: MediaEvent = serde_json::from_str(json).unwrap();
        match event {
            MediaEvent::Media { media } => {
                assert_eq!(media.payload, "AAAA");
                assert_eq!(media.track.as_deref(), Some("inbound"));
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_other() {
        let json = r#"{"event":"dtmf","dtmf":{"digit":"5"}}"#;
        let event: MediaEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, MediaEvent::Other));
    }

    #[test]
    fn test_serialize_outgoing_media() {
        let message = OutgoingEvent::Media {
            stream_sid: "MZ001".to_string(),
            media: OutgoingPayload {
                payload: "AAAA".to_string(),
            },
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ001");
        assert_eq!(json["media"]["payload"], "AAAA");
    }
}

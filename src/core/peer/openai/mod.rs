//! OpenAI Realtime API peer implementation.

pub mod client;
pub mod config;
pub mod messages;

pub use client::RealtimePeer;
pub use config::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, RealtimeModel, RealtimeVoice};

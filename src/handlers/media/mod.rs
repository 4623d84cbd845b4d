//! Telephony media-stream protocol handler.

pub mod handler;
pub mod messages;

pub use handler::media_handler;

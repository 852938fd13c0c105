//! Answer stream protocol
//!
//! Records are separated by a blank line. `event:` names the record type,
//! `data:` lines carry the payload, `:` lines are comments. Untyped records
//! fall back to the `[TAG] payload` convention, then to `chunk`.

mod decoder;
mod event;
mod legacy;

pub use decoder::{decode_stream, EventStream, FrameDecoder, RawRecord};
pub use event::{parse_timestamp, ContextEntry, SourcePayload, StreamEvent, FALLBACK_SOURCE_NAME};

use thiserror::Error;

/// A record whose payload did not fit its event type
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid {event_type} payload: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

impl DecodeError {
    pub fn invalid(event_type: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            event_type: event_type.to_string(),
            reason: reason.to_string(),
        }
    }
}

//! Canonical event codecs.
//!
//! Two wire forms share one schema:
//! - **JSON**: the event object serialised with RFC 8785 canonicalisation
//!   (deterministic key order), so equal events always produce identical
//!   bytes.
//! - **Binary**: a length-prefixed record — a 4-byte big-endian payload
//!   length followed by the canonical JSON payload.  Selected per endpoint
//!   by negotiation; round-trips with the JSON form by construction.
//!
//! Decoding is tolerant of unknown *fields* but not unknown *tags*: an
//! unrecognised `eventType` lands in [`Event::Unknown`], which always fails
//! validation downstream.

use serde_json::Value;

use crate::error::DecodeError;
use crate::event::{Event, EventType};

/// Length prefix size of the binary form.
pub const BINARY_PREFIX_LEN: usize = 4;

/// Encode an event as canonical JSON.
pub fn encode_json(event: &Event) -> Result<Vec<u8>, serde_json::Error> {
    match event {
        // Unknown preserves the original object verbatim.
        Event::Unknown { payload, .. } => serde_jcs::to_vec(payload),
        _ => serde_jcs::to_vec(event),
    }
}

/// Encode an event in the length-prefixed binary form.
pub fn encode_binary(event: &Event) -> Result<Vec<u8>, serde_json::Error> {
    let payload = encode_json(event)?;
    let mut out = Vec::with_capacity(BINARY_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode an event from its JSON form.
pub fn decode_json(bytes: &[u8]) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_value(value)
}

/// Decode an event from an already-parsed JSON value.
pub fn decode_value(value: Value) -> Result<Event, DecodeError> {
    let Some(obj) = value.as_object() else {
        return Err(DecodeError::NotAnObject);
    };
    let Some(tag) = obj.get("eventType").and_then(Value::as_str) else {
        return Err(DecodeError::MissingTag);
    };

    if EventType::from_tag(tag).is_none() {
        return Ok(Event::Unknown {
            event_type: tag.to_string(),
            payload: value,
        });
    }

    let event: Event = serde_json::from_value(value)?;
    Ok(event)
}

/// Decode an event from the length-prefixed binary form.
pub fn decode_binary(bytes: &[u8]) -> Result<Event, DecodeError> {
    if bytes.len() < BINARY_PREFIX_LEN {
        return Err(DecodeError::MissingPrefix);
    }
    let mut prefix = [0u8; BINARY_PREFIX_LEN];
    prefix.copy_from_slice(&bytes[..BINARY_PREFIX_LEN]);
    let declared = u32::from_be_bytes(prefix) as usize;
    let payload = &bytes[BINARY_PREFIX_LEN..];
    if payload.len() != declared {
        return Err(DecodeError::Truncated {
            declared,
            actual: payload.len(),
        });
    }
    decode_json(payload)
}

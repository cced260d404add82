//! Encode/decode of AIP frames, plus payload extraction.
//!
//! Decoding is the one place unknown `type` values are caught deliberately
//! (rather than surfacing as an opaque serde error) so the router can log a
//! structured `ProtocolError::UnknownType` and drop the frame.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::error::ProtocolError;

use super::message::{Envelope, MessageType};

const KNOWN_TYPES: &[&str] = &[
    "REGISTER",
    "HEARTBEAT",
    "TASK",
    "DEVICE_INFO_REQUEST",
    "DEVICE_INFO_RESPONSE",
    "COMMAND",
    "COMMAND_RESULTS",
    "TASK_END",
    "ERROR",
];

/// Serialize an envelope to its wire form: one UTF-8 JSON document.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

/// Parse one wire frame into an `Envelope`, rejecting unknown `type` values
/// with a distinct error from other schema violations.
pub fn decode(frame: &str) -> Result<Envelope, ProtocolError> {
    let raw: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    let type_tag = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::SchemaViolation("missing `type` field".into()))?;
    if !KNOWN_TYPES.contains(&type_tag) {
        return Err(ProtocolError::UnknownType(type_tag.to_string()));
    }

    if raw.get("session_id").is_none() {
        return Err(ProtocolError::MissingCorrelationId(type_tag.to_string()));
    }

    serde_json::from_value(raw).map_err(|e| ProtocolError::SchemaViolation(e.to_string()))
}

/// Decode `envelope.payload` into a typed payload struct, checking that the
/// envelope's `type` actually matches the payload being requested.
pub fn decode_payload<T: DeserializeOwned>(
    envelope: &Envelope,
    expected: MessageType,
) -> Result<T, ProtocolError> {
    if envelope.message_type != expected {
        return Err(ProtocolError::SchemaViolation(format!(
            "expected payload for {}, envelope is {}",
            expected.as_str(),
            envelope.message_type.as_str()
        )));
    }
    serde_json::from_value(envelope.payload.clone())
        .map_err(|e| ProtocolError::SchemaViolation(e.to_string()))
}

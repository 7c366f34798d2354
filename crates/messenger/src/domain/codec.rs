//! Payload codec.
//!
//! Payloads are `serde_json::Value` in memory and JSON bytes on the wire.

use crate::domain::error::MessengerResult;
use crate::domain::shape::{Shape, ShapeError};
use serde::Serialize;
use serde_json::Value;

/// Convert any serializable payload to its structured form.
pub fn to_value<T: Serialize + ?Sized>(payload: &T) -> MessengerResult<Value> {
    Ok(serde_json::to_value(payload)?)
}

/// Encode a structured payload for the wire.
pub fn encode(payload: &Value) -> MessengerResult<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Decode wire bytes. Empty bodies decode to `null`.
pub fn decode(bytes: &[u8]) -> Result<Value, ShapeError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ShapeError::Rejected(format!("undecodable payload: {}", e)))
}

/// Check a payload against an optional shape; no shape accepts anything.
pub fn validate(payload: &Value, shape: Option<&dyn Shape>) -> Result<(), ShapeError> {
    match shape {
        Some(shape) => shape.validate(payload),
        None => Ok(()),
    }
}

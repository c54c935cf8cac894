//! Payload (de)serialization at the transport boundary.
//!
//! Payloads travel through the pipeline as [`serde_json::Value`]; a
//! [`Serializer`] turns them into message bodies and back. [`JsonSerializer`]
//! is the default.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, HandlerError};

pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, payload: &Value) -> Result<Bytes, Error>;

    /// Decodes a message body; failures count as handler failures.
    fn deserialize(&self, data: &[u8]) -> Result<Value, HandlerError>;
}

/// JSON bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, payload: &Value) -> Result<Bytes, Error> {
        serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, HandlerError> {
        serde_json::from_slice(data).map_err(|e| HandlerError::Decode {
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bad_bodies_are_decode_failures() {
        let err = JsonSerializer.deserialize(b"{not json").unwrap_err();
        assert_eq!(err.as_label(), "handler_decode_failed");

        let body = JsonSerializer.serialize(&json!({"user_id": 1})).unwrap();
        assert_eq!(JsonSerializer.deserialize(&body).unwrap(), json!({"user_id": 1}));
    }
}

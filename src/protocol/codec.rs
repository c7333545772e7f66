//! Envelope encoding and decoding.
//!
//! Workers never format messages themselves; they are handed a [`Codec`]
//! when they are spawned. [`JsonCodec`] is the stock implementation.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

use super::message::{Message, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Key whose presence marks a response.
const STATUS_KEY: &str = "status";

/// Key whose presence marks a request.
const METHOD_KEY: &str = "method";

// ============================================================================
// Codec
// ============================================================================

/// Serializer/deserializer pair for envelopes.
///
/// Implementations must be stateless with respect to the stream: framing
/// is done before [`Codec::decode`] is called, one complete object at a time.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a message into its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;

    /// Decodes one framed object.
    ///
    /// Returns `Ok(None)` for a well-formed object that is neither a
    /// request nor a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or a recognised
    /// envelope has malformed fields.
    fn decode(&self, frame: &[u8]) -> Result<Option<Message>>;
}

// ============================================================================
// JsonCodec
// ============================================================================

/// JSON envelope codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates a new codec.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let bytes = match message {
            Message::Request(request) => serde_json::to_vec(request)?,
            Message::Response(response) => serde_json::to_vec(response)?,
        };
        Ok(bytes)
    }

    fn decode(&self, frame: &[u8]) -> Result<Option<Message>> {
        let value: Value = serde_json::from_slice(frame)?;

        let Value::Object(ref object) = value else {
            return Err(Error::protocol("framed value is not a JSON object"));
        };

        let has_key = |key: &str| object.get(key).is_some_and(|v| !v.is_null());
        let is_response = has_key(STATUS_KEY);
        let is_request = has_key(METHOD_KEY);

        if is_response {
            let response: Response = serde_json::from_value(value)
                .map_err(|e| Error::protocol(format!("malformed response: {e}")))?;
            return Ok(Some(Message::Response(response)));
        }

        if is_request {
            let request: Request = serde_json::from_value(value)
                .map_err(|e| Error::protocol(format!("malformed request: {e}")))?;
            return Ok(Some(Message::Request(request)));
        }

        Ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let frame = br#"{"status": 200, "resource": "/feeds/sensor1", "token": "T1", "body": {"v": 1}}"#;
        let message = JsonCodec.decode(frame).expect("decode");

        let Some(Message::Response(response)) = message else {
            panic!("expected response, got {message:?}");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.resource.as_deref(), Some("/feeds/sensor1"));
        assert_eq!(response.token.as_ref().map(|t| t.as_str()), Some("T1"));
        assert_eq!(response.body, Some(json!({"v": 1})));
    }

    #[test]
    fn test_decode_request() {
        let frame = br#"{"method": "POST", "resource": "/cmd", "token": "R1", "params": {"a": 1}}"#;
        let message = JsonCodec.decode(frame).expect("decode");

        let Some(Message::Request(request)) = message else {
            panic!("expected request, got {message:?}");
        };
        assert_eq!(request.method, "POST");
        assert_eq!(request.param("a"), Some("1".to_string()));
    }

    #[test]
    fn test_status_wins_over_method() {
        let frame = br#"{"status": 500, "method": "GET"}"#;
        let message = JsonCodec.decode(frame).expect("decode");
        assert!(matches!(message, Some(Message::Response(_))));
    }

    #[test]
    fn test_null_keys_count_as_absent() {
        let frame = br#"{"status": null, "method": "GET", "resource": "/"}"#;
        let message = JsonCodec.decode(frame).expect("decode");
        assert!(matches!(message, Some(Message::Request(_))));
    }

    #[test]
    fn test_unclassified_object_is_none() {
        let message = JsonCodec.decode(br#"{"hello": "world"}"#).expect("decode");
        assert!(message.is_none());
    }

    #[test]
    fn test_invalid_json_is_error() {
        let err = JsonCodec.decode(b"{not json}").unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_malformed_status_is_protocol_error() {
        let err = JsonCodec.decode(br#"{"status": "ok"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_encode_then_decode_request() {
        let request = Request::new("GET", "/feeds").with_token("T5").with_param("limit", 5);
        let bytes = JsonCodec
            .encode(&Message::Request(request.clone()))
            .expect("encode");

        let decoded = JsonCodec.decode(&bytes).expect("decode");
        assert_eq!(decoded, Some(Message::Request(request)));
    }
}

//! Payload codecs.
//!
//! A serializer is a stateless encode/decode pair. Encoding can fail and
//! reports why; decoding returns `None` for anything malformed so the
//! consumer loop can drop it without raising a stream error.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

/// Encode/decode pair used by the bus for every topic.
pub trait Serializer: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Decode a payload, or `None` if it is empty, malformed, or of the
    /// wrong shape for `T`.
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Option<T>;
}

/// JSON payloads via `serde_json`. The default codec.
///
/// Field naming follows the message type's serde attributes; use
/// `#[serde(rename_all = "camelCase")]` to interoperate with camelCase
/// producers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Option<T> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(payload).ok()
    }
}

/// Compact binary payloads via `bitcode`.
///
/// Only useful when every producer on the topic also uses bitcode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcodeSerializer;

impl Serializer for BitcodeSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        Ok(bitcode::serialize(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Option<T> {
        if payload.is_empty() {
            return None;
        }
        bitcode::deserialize(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct OrderCreated {
        id: u32,
        customer: String,
        amount: f64,
    }

    fn order() -> OrderCreated {
        OrderCreated {
            id: 1,
            customer: "JoeDevSharp".into(),
            amount: 150.75,
        }
    }

    #[test]
    fn json_round_trip() {
        let bytes = JsonSerializer.encode(&order()).unwrap();
        assert_eq!(JsonSerializer.decode::<OrderCreated>(&bytes), Some(order()));
    }

    #[test]
    fn json_uses_type_field_naming() {
        let bytes = JsonSerializer
            .encode(&serde_json::json!({ "id": 7, "customer": "a", "amount": 1.0 }))
            .unwrap();
        let decoded: OrderCreated = JsonSerializer.decode(&bytes).unwrap();
        assert_eq!(decoded.id, 7);
    }

    #[test]
    fn json_malformed_is_none() {
        assert_eq!(JsonSerializer.decode::<OrderCreated>(b"{not json"), None);
        assert_eq!(JsonSerializer.decode::<OrderCreated>(b"{\"id\":\"x\"}"), None);
        assert_eq!(JsonSerializer.decode::<OrderCreated>(b"   "), None);
        assert_eq!(JsonSerializer.decode::<OrderCreated>(b""), None);
    }

    #[test]
    fn bitcode_round_trip() {
        let bytes = BitcodeSerializer.encode(&order()).unwrap();
        assert_eq!(BitcodeSerializer.decode::<OrderCreated>(&bytes), Some(order()));
    }

    #[test]
    fn bitcode_garbage_is_none() {
        assert_eq!(BitcodeSerializer.decode::<OrderCreated>(&[]), None);
        assert_eq!(BitcodeSerializer.decode::<OrderCreated>(&[0xff]), None);
    }
}

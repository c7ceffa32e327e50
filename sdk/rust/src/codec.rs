//! JSON-UTF8 wire encoding for message values and UTF-8 encoding for keys.

use crate::error::{ClientError, Result};
use crate::message::{InboundRecord, Message, OutboundRecord};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;

/// Encode a value as JSON-UTF8
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ClientError::Serialization(e.to_string()))
}

/// Decode a JSON-UTF8 payload
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Deserialization(e.to_string()))
}

/// Stringify and encode a key. Empty keys are treated as absent.
pub fn encode_key<K: Display + ?Sized>(key: &K) -> Option<Vec<u8>> {
    let key = key.to_string();
    if key.is_empty() {
        None
    } else {
        Some(key.into_bytes())
    }
}

/// Decode a key; absent or empty keys yield `None`
pub fn decode_key(bytes: Option<&[u8]>) -> Result<Option<String>> {
    match bytes {
        None | Some([]) => Ok(None),
        Some(bytes) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|e| ClientError::Deserialization(format!("key is not valid UTF-8: {}", e))),
    }
}

/// Build the wire record for `topic`
pub fn encode_record<T, K>(topic: &str, value: &T, key: Option<&K>) -> Result<OutboundRecord>
where
    T: Serialize + ?Sized,
    K: Display + ?Sized,
{
    Ok(OutboundRecord {
        topic: topic.to_string(),
        key: key.and_then(encode_key),
        payload: encode_value(value)?,
    })
}

/// Decode an inbound record into an application message
pub fn decode_record(record: &InboundRecord) -> Result<Message> {
    let key = decode_key(record.key.as_deref())?;
    let value = decode_value(&record.payload)?;
    Ok(Message { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<u64>().prop_map(|n| json!(n)),
            (-1_000_000i32..1_000_000).prop_map(|n| json!(n as f64 / 4.0)),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_value_round_trip(value in arb_json()) {
            let bytes = encode_value(&value).unwrap();
            let decoded: Value = decode_value(&bytes).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn prop_key_round_trip(key in ".+") {
            let bytes = encode_key(&key);
            prop_assert_eq!(decode_key(bytes.as_deref()).unwrap(), Some(key));
        }
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        assert_eq!(encode_key(&42), Some(b"42".to_vec()));
        assert_eq!(encode_key(&true), Some(b"true".to_vec()));
        assert_eq!(encode_key(""), None);
    }

    #[test]
    fn test_malformed_payload_is_deserialization_error() {
        let err = decode_value::<Value>(b"{\"event_type\":").unwrap_err();
        assert!(matches!(err, ClientError::Deserialization(_)));

        let err = decode_key(Some(&[0xffu8, 0xfe][..])).unwrap_err();
        assert!(matches!(err, ClientError::Deserialization(_)));
    }

    #[test]
    fn test_record_encoding() {
        let value = json!({"event_type": "login", "username": "alice"});
        let record = encode_record("user-activity", &value, Some("alice")).unwrap();
        assert_eq!(record.topic, "user-activity");
        assert_eq!(record.key.as_deref(), Some(&b"alice"[..]));

        let inbound = InboundRecord {
            topic: record.topic,
            partition: 0,
            offset: 7,
            key: record.key,
            payload: record.payload,
        };
        let message = decode_record(&inbound).unwrap();
        assert_eq!(message.key.as_deref(), Some("alice"));
        assert_eq!(message.value, value);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An application-level message: optional key, always-present JSON value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Partition-affinity key
    pub key: Option<String>,

    /// JSON payload
    pub value: Value,
}

impl Message {
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self { key, value }
    }

    /// Split into the `(key, value)` pair handed to handlers
    pub fn into_parts(self) -> (Option<String>, Value) {
        (self.key, self.value)
    }
}

/// Broker acknowledgment for a delivered record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Encoded record ready to be handed to a producer handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Encoded record as read from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl InboundRecord {
    /// Size of key plus payload in bytes
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map(Vec::len).unwrap_or(0)
    }
}

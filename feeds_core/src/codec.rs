//! Encoding of values stored in a feed.
//!
//! UTF-8 strings and raw bytes are stored as-is; every other JSON value is
//! stored as its compact JSON text. Decoding tries JSON first and falls back
//! to the raw string (or raw bytes when not UTF-8). Types therefore do not
//! always survive a round trip: the string `"42"` reads back as the number
//! `42`. Existing data depends on this leniency, so decoding never fails.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A value as written to or read from a feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedValue {
    Bytes(Bytes),
    Json(Value),
}

impl FeedValue {
    pub fn null() -> Self {
        FeedValue::Json(Value::Null)
    }

    /// Bytes persisted for this value.
    pub fn encode(&self) -> Bytes {
        match self {
            FeedValue::Bytes(bytes) => bytes.clone(),
            FeedValue::Json(Value::String(s)) => Bytes::copy_from_slice(s.as_bytes()),
            FeedValue::Json(value) => Bytes::from(value.to_string()),
        }
    }

    /// Best-effort decode; never fails.
    pub fn decode(bytes: &[u8]) -> Self {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return FeedValue::Json(value);
        }
        match std::str::from_utf8(bytes) {
            Ok(s) => FeedValue::Json(Value::String(s.to_owned())),
            Err(_) => FeedValue::Bytes(Bytes::copy_from_slice(bytes)),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FeedValue::Json(value) => Some(value),
            FeedValue::Bytes(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    /// Converts a JSON value into `T`; `None` for raw bytes or a shape mismatch.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// True when `bytes` already hold this value, either byte-for-byte or
    /// as a structurally equal JSON document.
    pub fn matches_encoded(&self, bytes: &[u8]) -> bool {
        if self.encode().as_ref() == bytes {
            return true;
        }
        match (self, FeedValue::decode(bytes)) {
            (FeedValue::Json(target), FeedValue::Json(existing)) => *target == existing,
            _ => false,
        }
    }
}

impl From<Value> for FeedValue {
    fn from(value: Value) -> Self {
        FeedValue::Json(value)
    }
}

impl From<&str> for FeedValue {
    fn from(value: &str) -> Self {
        FeedValue::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for FeedValue {
    fn from(value: String) -> Self {
        FeedValue::Json(Value::String(value))
    }
}

impl From<Bytes> for FeedValue {
    fn from(value: Bytes) -> Self {
        FeedValue::Bytes(value)
    }
}

impl From<Vec<u8>> for FeedValue {
    fn from(value: Vec<u8>) -> Self {
        FeedValue::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for FeedValue {
    fn from(value: &[u8]) -> Self {
        FeedValue::Bytes(Bytes::copy_from_slice(value))
    }
}

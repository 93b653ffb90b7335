//! Handler return values and their normalization to response bytes

use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Reply normalization errors
#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("Unsupported response type: {0}")]
    UnsupportedType(&'static str),
}

pub type ReplyResult<T> = Result<T, ReplyError>;

/// Value returned by an endpoint handler
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No data; sent as a zero-length response
    Empty,
    /// Raw bytes, sent unchanged
    Bytes(Bytes),
    /// Text, sent as UTF-8
    Text(String),
    /// Key/value map, sent as JSON text. Any other JSON shape is rejected.
    Structured(Value),
}

impl Reply {
    /// Build the `{"error": message}` reply substituted for a failed handler
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::String(message.into()));
        Reply::Structured(Value::Object(map))
    }

    /// Short name of the carried value, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Empty => "empty",
            Reply::Bytes(_) => "bytes",
            Reply::Text(_) => "text",
            Reply::Structured(value) => json_kind(value),
        }
    }

    /// Normalize to the bytes carried by the response frame
    pub fn into_bytes(self) -> ReplyResult<Bytes> {
        match self {
            Reply::Empty => Ok(Bytes::new()),
            Reply::Bytes(bytes) => Ok(bytes),
            Reply::Text(text) => Ok(Bytes::from(text)),
            Reply::Structured(value @ Value::Object(_)) => Ok(Bytes::from(value.to_string())),
            Reply::Structured(value) => Err(ReplyError::UnsupportedType(json_kind(&value))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Reply::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Reply::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Reply {
    fn from(bytes: &'static [u8]) -> Self {
        Reply::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Structured(value)
    }
}

impl From<Map<String, Value>> for Reply {
    fn from(map: Map<String, Value>) -> Self {
        Reply::Structured(Value::Object(map))
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Reply {
    fn from(map: HashMap<String, V>) -> Self {
        let map: Map<String, Value> = map.into_iter().map(|(k, v)| (k, v.into())).collect();
        Reply::Structured(Value::Object(map))
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Reply::Empty)
    }
}

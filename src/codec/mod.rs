//! Key/value codecs between wire bytes and the configured representation.
//!
//! Built-ins: `utf8` (aliases `utf-8`, `string`), `binary` (`buffer`) and
//! `json`. Names prefixed `kafka-cache.` resolve through [`custom`].

pub mod compression;
pub mod custom;

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{CacheError, CodecError};
pub use custom::CustomEncoding;

// ========================================
// DATUM
// ========================================

/// A decoded key or value.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl Datum {
    /// Whether this datum is usable as a cache key.
    ///
    /// Empty byte sequences, empty text and falsy JSON scalars are not. A
    /// JSON-serialized buffer (`{"type":"Buffer","data":[..]}`) counts as
    /// its bytes.
    pub fn is_truthy(&self) -> bool {
        match self {
            Datum::Text(s) => !s.is_empty(),
            Datum::Bytes(b) => !b.is_empty(),
            Datum::Json(v) => json_is_truthy(v),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s),
            Datum::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Datum::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Datum::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn to_json(&self) -> Result<Value, CodecError> {
        match self {
            Datum::Text(s) => Ok(Value::String(s.clone())),
            Datum::Json(v) => Ok(v.clone()),
            Datum::Bytes(_) => Err(CodecError::Unsupported { encoding: "json", found: "raw bytes" }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Datum::Text(_) => "text",
            Datum::Bytes(_) => "bytes",
            Datum::Json(_) => "json",
        }
    }
}

fn json_is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("Buffer") => {
            map.get("data")
                .and_then(Value::as_array)
                .map(|data| !data.is_empty())
                .unwrap_or(false)
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Datum::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::Text(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::Text(s)
    }
}

impl From<Bytes> for Datum {
    fn from(b: Bytes) -> Self {
        Datum::Bytes(b)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(b: Vec<u8>) -> Self {
        Datum::Bytes(Bytes::from(b))
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        Datum::Json(v)
    }
}

// ========================================
// ENCODING
// ========================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Encoding {
    Utf8,
    Binary,
    Json,
    Custom(&'static CustomEncoding),
}

impl Encoding {
    pub fn parse(name: &str) -> Result<Self, CacheError> {
        if custom::is_custom_name(name) {
            return custom::lookup(name)
                .map(Encoding::Custom)
                .ok_or_else(|| CacheError::InvalidArgument(format!("Invalid custom encoding: {}", name)));
        }
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" | "string" => Ok(Encoding::Utf8),
            "binary" | "buffer" => Ok(Encoding::Binary),
            "json" => Ok(Encoding::Json),
            other => Err(CacheError::InvalidArgument(format!("Unknown encoding: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Binary => "binary",
            Encoding::Json => "json",
            Encoding::Custom(c) => c.name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Encoding::Custom(_))
    }

    pub fn encode(&self, datum: &Datum) -> Result<Bytes, CodecError> {
        match (self, datum) {
            (Encoding::Utf8, Datum::Text(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            (Encoding::Utf8, Datum::Bytes(b)) => Ok(b.clone()),
            (Encoding::Utf8, Datum::Json(Value::String(s))) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            (Encoding::Utf8, Datum::Json(v)) => Ok(Bytes::from(v.to_string())),

            (Encoding::Binary, Datum::Bytes(b)) => Ok(b.clone()),
            (Encoding::Binary, Datum::Text(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            (Encoding::Binary, Datum::Json(v)) => serde_json::to_vec(v)
                .map(Bytes::from)
                .map_err(|e| CodecError::Json(e.to_string())),

            (Encoding::Json, d) => {
                let value = d.to_json().map_err(|_| CodecError::Unsupported {
                    encoding: "json",
                    found: d.kind(),
                })?;
                serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .map_err(|e| CodecError::Json(e.to_string()))
            }

            (Encoding::Custom(c), d) => (c.encode)(d),
        }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Datum, CodecError> {
        match self {
            // Non-text payloads keep their exact bytes, so distinct keys never collide.
            Encoding::Utf8 => Ok(match std::str::from_utf8(raw) {
                Ok(s) => Datum::Text(s.to_string()),
                Err(_) => Datum::Bytes(Bytes::copy_from_slice(raw)),
            }),
            Encoding::Binary => Ok(Datum::Bytes(Bytes::copy_from_slice(raw))),
            Encoding::Json => serde_json::from_slice(raw)
                .map(Datum::Json)
                .map_err(|e| CodecError::Json(e.to_string())),
            Encoding::Custom(c) => (c.decode)(raw),
        }
    }
}

// ========================================
// VALUE CODEC (encoding + optional compression)
// ========================================

/// Wire codec for values: the configured encoding, optionally gzipped.
///
/// Compression and custom encodings never stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueCodec {
    encoding: Encoding,
    compress: bool,
}

impl ValueCodec {
    pub fn new(encoding: Encoding, compress: bool) -> Result<Self, CacheError> {
        if compress && encoding.is_custom() {
            return Err(CacheError::InvalidArgument(format!(
                "compress_values cannot be combined with custom value encoding {}",
                encoding.name()
            )));
        }
        Ok(Self { encoding, compress })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn compressed(&self) -> bool {
        self.compress
    }

    pub fn encode(&self, datum: &Datum) -> Result<Bytes, CodecError> {
        let raw = self.encoding.encode(datum)?;
        if self.compress {
            compression::compress(&raw)
        } else {
            Ok(raw)
        }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Datum, CodecError> {
        if self.compress {
            let plain = compression::decompress(raw)?;
            self.encoding.decode(&plain)
        } else {
            self.encoding.decode(raw)
        }
    }
}

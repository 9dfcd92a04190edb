//! Named encodings outside the built-in text/binary/json set.
//!
//! Every name under the `kafka-cache.` prefix belongs to this registry, so a
//! typo there is an error instead of a silent fallback.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::codec::{compression, Datum};
use crate::error::CodecError;

pub const CUSTOM_PREFIX: &str = "kafka-cache.";
pub const JSON_GZIP: &str = "kafka-cache.json.gzip";

pub struct CustomEncoding {
    pub name: &'static str,
    pub encode: fn(&Datum) -> Result<Bytes, CodecError>,
    pub decode: fn(&[u8]) -> Result<Datum, CodecError>,
}

impl fmt::Debug for CustomEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEncoding").field("name", &self.name).finish()
    }
}

impl PartialEq for CustomEncoding {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

static CUSTOM_ENCODINGS: Lazy<HashMap<&'static str, CustomEncoding>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(JSON_GZIP, CustomEncoding {
        name: JSON_GZIP,
        encode: encode_json_gzip,
        decode: decode_json_gzip,
    });
    map
});

pub fn is_custom_name(name: &str) -> bool {
    name.starts_with(CUSTOM_PREFIX)
}

pub fn lookup(name: &str) -> Option<&'static CustomEncoding> {
    CUSTOM_ENCODINGS.get(name)
}

fn encode_json_gzip(datum: &Datum) -> Result<Bytes, CodecError> {
    compression::compress_json(&datum.to_json()?)
}

fn decode_json_gzip(raw: &[u8]) -> Result<Datum, CodecError> {
    compression::decompress_json(raw).map(Datum::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_gzip_decode_encode_is_identity() {
        let codec = lookup(JSON_GZIP).expect("registered");
        let encoded = (codec.encode)(&Datum::Json(json!({ "foo": "bar" }))).unwrap();
        assert_eq!((codec.decode)(&encoded).unwrap(), Datum::Json(json!({ "foo": "bar" })));
    }

    #[test]
    fn prefix_detection() {
        assert!(is_custom_name("kafka-cache.json.gzip"));
        assert!(is_custom_name("kafka-cache.nope"));
        assert!(!is_custom_name("json"));
        assert!(lookup("kafka-cache.nope").is_none());
    }
}

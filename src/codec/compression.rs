//! Gzip helpers for serialized values.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::CodecError;

pub fn compress(serialized: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(serialized.len() / 2 + 32), Compression::default());
    encoder
        .write_all(serialized)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    let out = encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    Ok(Bytes::from(out))
}

pub fn decompress(compressed: &[u8]) -> Result<Bytes, CodecError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::with_capacity(compressed.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    Ok(Bytes::from(out))
}

pub fn compress_json(value: &serde_json::Value) -> Result<Bytes, CodecError> {
    let text = serde_json::to_vec(value).map_err(|e| CodecError::Json(e.to_string()))?;
    compress(&text)
}

pub fn decompress_json(compressed: &[u8]) -> Result<serde_json::Value, CodecError> {
    let raw = decompress(compressed)?;
    serde_json::from_slice(&raw).map_err(|e| CodecError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_survives_gzip() {
        let value = json!({ "foo": "bar", "n": [1, 2, 3], "nested": { "ok": true } });
        let packed = compress_json(&value).unwrap();
        // gzip magic
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress_json(&packed).unwrap(), value);
    }

    #[test]
    fn plain_bytes_are_not_gzip() {
        let err = decompress(b"{\"foo\":\"bar\"}").unwrap_err();
        assert!(matches!(err, CodecError::Compression(_)));
    }

    #[test]
    fn repetitive_payload_shrinks() {
        let payload = "whadup ".repeat(1000);
        let packed = compress(payload.as_bytes()).unwrap();
        assert!(packed.len() < payload.len() / 10);
        assert_eq!(decompress(&packed).unwrap(), Bytes::from(payload));
    }
}

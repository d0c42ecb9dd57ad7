//! Length-prefixed JSON header codec for the safetensors container.
//!
//! A safetensors file is `[u64 LE header length][UTF-8 JSON][tensor data]`.
//! The codec decodes the prefix and JSON into a [`SafetensorsHeader`],
//! exposes the `__metadata__` block and the typed tensor index, and
//! re-encodes with compact separators so the emitted bytes match the
//! ecosystem's canonical layout.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FormatError;
use crate::keys::METADATA_KEY;

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_BYTES: u64 = 8;

/// Sanity cap on the declared header length, matching the safetensors
/// ecosystem's 100 MB limit.
pub const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

/// One entry of the tensor index.
///
/// Offsets are relative to the start of the payload region. Unknown extra
/// fields are rejected: a header this codec cannot fully model is not safe
/// to patch structurally, and the save falls back to the full rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<u64>,
    pub data_offsets: (u64, u64),
}

/// Decoded safetensors header.
#[derive(Debug, Clone)]
pub struct SafetensorsHeader {
    header_len: u64,
    root: Map<String, Value>,
}

impl SafetensorsHeader {
    /// Decode from a reader positioned at the start of the file.
    ///
    /// On success the reader is left at the first payload byte. Pure apart
    /// from reads on `reader`; deterministic.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut prefix = [0u8; 8];
        let got = read_full(reader, &mut prefix)?;
        if got < prefix.len() {
            return Err(FormatError::Truncated {
                expected: LENGTH_PREFIX_BYTES,
                actual: got as u64,
            });
        }
        let header_len = u64::from_le_bytes(prefix);
        if header_len > MAX_HEADER_LEN {
            return Err(FormatError::HeaderTooLarge { len: header_len, max: MAX_HEADER_LEN });
        }

        // The declared length is untrusted input; grow the buffer as bytes
        // actually arrive.
        let mut json_bytes = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        let mut remaining = header_len as usize;
        while remaining > 0 {
            let want = chunk.len().min(remaining);
            let got = read_full(reader, &mut chunk[..want])?;
            json_bytes.extend_from_slice(&chunk[..got]);
            if got < want {
                return Err(FormatError::Truncated {
                    expected: header_len,
                    actual: json_bytes.len() as u64,
                });
            }
            remaining -= got;
        }

        let value: Value = serde_json::from_slice(&json_bytes)?;
        let Value::Object(root) = value else {
            return Err(FormatError::NotAnObject);
        };
        Ok(Self { header_len, root })
    }

    /// Decode the header of the file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::decode(&mut BufReader::new(file))
    }

    /// Byte length of the JSON header as stored on disk.
    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        LENGTH_PREFIX_BYTES + self.header_len
    }

    /// The `__metadata__` block. A missing block decodes as empty; the
    /// format requires every value to be a string.
    pub fn metadata(&self) -> Result<HashMap<String, String>, FormatError> {
        let Some(value) = self.root.get(METADATA_KEY) else {
            return Ok(HashMap::new());
        };
        let Value::Object(block) = value else {
            return Err(FormatError::InvalidMetadata { key: METADATA_KEY.to_string() });
        };
        let mut out = HashMap::with_capacity(block.len());
        for (key, value) in block {
            match value {
                Value::String(s) => {
                    out.insert(key.clone(), s.clone());
                }
                _ => return Err(FormatError::InvalidMetadata { key: key.clone() }),
            }
        }
        Ok(out)
    }

    /// Typed view of the tensor index. Keys starting with `__` are reserved
    /// and skipped.
    pub fn tensor_index(&self) -> Result<HashMap<String, TensorInfo>, FormatError> {
        let mut out = HashMap::new();
        for (name, value) in &self.root {
            if name.starts_with("__") {
                continue;
            }
            let info: TensorInfo = serde_json::from_value(value.clone()).map_err(|e| {
                FormatError::InvalidTensorEntry { name: name.clone(), reason: e.to_string() }
            })?;
            out.insert(name.clone(), info);
        }
        Ok(out)
    }

    /// Replace the `__metadata__` block.
    pub fn set_metadata(&mut self, metadata: &HashMap<String, String>) {
        let block: Map<String, Value> =
            metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        self.root.insert(METADATA_KEY.to_string(), Value::Object(block));
    }

    /// Encode as `[u64 LE length][compact JSON]`.
    ///
    /// serde_json emits compact separators and sorted keys, so encoding the
    /// same header twice yields identical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let json = serde_json::to_vec(&Value::Object(self.root.clone()))
            .expect("a map of JSON values always serializes");
        let mut out = Vec::with_capacity(8 + json.len());
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(&json);
        out
    }
}

/// Read only the `__metadata__` block of the file at `path`.
pub fn read_metadata(path: &Path) -> Result<HashMap<String, String>, FormatError> {
    SafetensorsHeader::from_path(path)?.metadata()
}

/// Read the raw header JSON of the file at `path` (tensor index plus
/// metadata), for display surfaces that want the unmodeled object.
pub fn read_header_json(path: &Path) -> Result<Map<String, Value>, FormatError> {
    Ok(SafetensorsHeader::from_path(path)?.root)
}

/// Fill `buf` as far as the reader allows, returning the count. A short
/// count means EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_raw(json: &str) -> Vec<u8> {
        let mut out = (json.len() as u64).to_le_bytes().to_vec();
        out.extend_from_slice(json.as_bytes());
        out
    }

    fn decode_bytes(bytes: &[u8]) -> Result<SafetensorsHeader, FormatError> {
        SafetensorsHeader::decode(&mut Cursor::new(bytes))
    }

    #[test]
    fn decode_empty_object() {
        let header = decode_bytes(&encode_raw("{}")).unwrap();
        assert_eq!(header.header_len(), 2);
        assert_eq!(header.payload_offset(), 10);
        assert!(header.metadata().unwrap().is_empty());
        assert!(header.tensor_index().unwrap().is_empty());
    }

    #[test]
    fn truncated_length_prefix() {
        // Four bytes cannot even hold the length field.
        let err = decode_bytes(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { expected: 8, actual: 4 }));
    }

    #[test]
    fn truncated_header_body() {
        let mut bytes = encode_raw("{\"a\":1}");
        bytes.truncate(11);
        let err = decode_bytes(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { expected: 7, actual: 3 }));
    }

    #[test]
    fn declared_length_over_cap() {
        let bytes = (MAX_HEADER_LEN + 1).to_le_bytes().to_vec();
        let err = decode_bytes(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::HeaderTooLarge { .. }));
    }

    #[test]
    fn invalid_json_body() {
        let err = decode_bytes(&encode_raw("not json")).unwrap_err();
        assert!(matches!(err, FormatError::InvalidJson(_)));
    }

    #[test]
    fn non_object_root() {
        let err = decode_bytes(&encode_raw("[1,2]")).unwrap_err();
        assert!(matches!(err, FormatError::NotAnObject));
    }

    #[test]
    fn metadata_block_decodes() {
        let header =
            decode_bytes(&encode_raw(r#"{"__metadata__":{"modelspec.title":"x"}}"#)).unwrap();
        let meta = header.metadata().unwrap();
        assert_eq!(meta.get("modelspec.title").map(String::as_str), Some("x"));
    }

    #[test]
    fn non_string_metadata_value_rejected() {
        let header = decode_bytes(&encode_raw(r#"{"__metadata__":{"k":7}}"#)).unwrap();
        let err = header.metadata().unwrap_err();
        assert!(matches!(err, FormatError::InvalidMetadata { key } if key == "k"));
    }

    #[test]
    fn tensor_index_parses_offsets() {
        let header = decode_bytes(&encode_raw(
            r#"{"w":{"dtype":"F32","shape":[2,2],"data_offsets":[0,16]}}"#,
        ))
        .unwrap();
        let index = header.tensor_index().unwrap();
        assert_eq!(index["w"].data_offsets, (0, 16));
        assert_eq!(index["w"].shape, vec![2, 2]);
    }

    #[test]
    fn unknown_tensor_field_rejected() {
        let header = decode_bytes(&encode_raw(
            r#"{"w":{"dtype":"F32","shape":[1],"data_offsets":[0,4],"alignment":8}}"#,
        ))
        .unwrap();
        let err = header.tensor_index().unwrap_err();
        assert!(matches!(err, FormatError::InvalidTensorEntry { name, .. } if name == "w"));
    }

    #[test]
    fn encode_round_trips_and_is_deterministic() {
        let mut header =
            decode_bytes(&encode_raw(r#"{"w":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#))
                .unwrap();
        header.set_metadata(&HashMap::from([("a".to_string(), "1".to_string())]));
        let first = header.encode();
        let reparsed = decode_bytes(&first).unwrap();
        assert_eq!(reparsed.metadata().unwrap().get("a").map(String::as_str), Some("1"));
        assert_eq!(first, reparsed.encode());
    }

    #[test]
    fn encoded_length_prefix_matches_json() {
        let header = decode_bytes(&encode_raw("{}")).unwrap();
        let bytes = header.encode();
        let declared = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        assert_eq!(declared as usize, bytes.len() - 8);
    }
}

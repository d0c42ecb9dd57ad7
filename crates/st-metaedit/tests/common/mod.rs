#![allow(dead_code)]

use std::collections::HashMap;

use serde_json::{Map, Value, json};

pub fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Build a complete safetensors file in memory: length prefix, compact JSON
/// header, then the concatenated tensor payloads.
pub fn build_safetensors(
    tensors: &[(&str, &str, &[u64], &[u8])],
    metadata: Option<&HashMap<String, String>>,
) -> Vec<u8> {
    let mut root = Map::new();
    if let Some(meta) = metadata {
        let block: Map<String, Value> =
            meta.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        root.insert("__metadata__".to_string(), Value::Object(block));
    }
    let mut payload = Vec::new();
    for (name, dtype, shape, data) in tensors {
        let start = payload.len() as u64;
        payload.extend_from_slice(data);
        let end = payload.len() as u64;
        root.insert(
            (*name).to_string(),
            json!({ "dtype": dtype, "shape": shape, "data_offsets": [start, end] }),
        );
    }
    let header = serde_json::to_vec(&Value::Object(root)).unwrap();
    let mut out = (header.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    out
}

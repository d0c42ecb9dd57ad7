//! Slow-path rewrite: load every tensor through the safetensors crate and
//! re-serialize with merged metadata.
//!
//! Used when the structural patch cannot be trusted. O(total tensor bytes)
//! in peak memory and strictly slower than the fast path, but it accepts
//! any file the framework itself can load, including headers the strict
//! codec rejects. The output may differ from the input in incidental
//! header byte layout; tensors and metadata are preserved.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use safetensors::tensor::{TensorView, serialize_to_file};
use safetensors::{Dtype, SafeTensors};
use tracing::warn;

use crate::copy::{CancelToken, ProgressCallback, report};
use crate::error::FatalError;
use crate::patch::merge_metadata;

/// Rewrite `source` into `temp_path` with `updates` merged into its
/// metadata, round-tripping every tensor through the framework.
///
/// Per-tensor progress is batched to every `max(50, count / 10)` tensors so
/// models with thousands of small tensors do not flood the sink.
pub fn rewrite_file(
    source: &Path,
    temp_path: &Path,
    updates: &HashMap<String, String>,
    cancel: &CancelToken,
    progress: Option<&ProgressCallback>,
) -> Result<(), FatalError> {
    report(progress, 0, "Using standard method...");

    let buf = fs::read(source)?;
    let st = SafeTensors::deserialize(&buf)
        .map_err(|e| FatalError::Load { path: source.to_path_buf(), reason: e.to_string() })?;
    let (_, header) = SafeTensors::read_metadata(&buf)
        .map_err(|e| FatalError::Load { path: source.to_path_buf(), reason: e.to_string() })?;
    let existing = header.metadata().clone().unwrap_or_default();
    let merged = merge_metadata(&existing, updates);

    // Copy into owned storage first so the serialized views borrow stable
    // buffers.
    let tensors = st.tensors();
    let total = tensors.len();
    let batch = (total / 10).max(50);
    let mut storage: HashMap<String, (Dtype, Vec<usize>, Vec<u8>)> =
        HashMap::with_capacity(total);
    for (i, (name, view)) in tensors.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(FatalError::Cancelled);
        }
        if i % batch == 0 || i + 1 == total {
            let percent = ((i + 1) * 100 / total.max(1)) as u8;
            report(progress, percent, "Loading tensors...");
        }
        storage.insert(name.to_string(), (view.dtype(), view.shape().to_vec(), view.data().to_vec()));
    }

    let views: HashMap<String, TensorView<'_>> = storage
        .iter()
        .map(|(name, (dtype, shape, data))| {
            let view = TensorView::new(*dtype, shape.clone(), data.as_slice()).map_err(|e| {
                FatalError::Save { path: temp_path.to_path_buf(), reason: format!("{name}: {e}") }
            })?;
            Ok((name.clone(), view))
        })
        .collect::<Result<_, FatalError>>()?;

    report(progress, 100, "Saving with updated metadata...");
    serialize_to_file(&views, &Some(merged), temp_path)
        .map_err(|e| FatalError::Save { path: temp_path.to_path_buf(), reason: e.to_string() })?;
    warn!(source = %source.display(), "rewrote file via full tensor round-trip");
    Ok(())
}

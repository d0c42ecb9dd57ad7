//! Fast-path metadata patch: rewrite only the header, stream the payload
//! through unchanged.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::copy::{CancelToken, CopyError, ProgressCallback, copy_chunked, report};
use crate::error::PatchError;
use crate::header::SafetensorsHeader;

/// Merge `updates` into `existing`: overwrite-or-insert, never delete.
///
/// An empty-string update clears a field but keeps its key, so merging and
/// reading back round-trips. Keys absent from `updates` are untouched.
pub fn merge_metadata(
    existing: &HashMap<String, String>,
    updates: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = existing.clone();
    for (key, value) in updates {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Rewrite `source` into `temp_path` with `updates` merged into its
/// metadata, leaving the payload region byte-identical.
///
/// Any `FormatError` (including a tensor index the codec cannot fully
/// model) surfaces as [`PatchError::Format`] so the caller can fall back to
/// the full rewrite. On error, partial output at `temp_path` is the
/// caller's to discard. Progress is scaled to payload bytes only.
pub fn patch_file(
    source: &Path,
    temp_path: &Path,
    updates: &HashMap<String, String>,
    chunk_size: usize,
    cancel: &CancelToken,
    progress: Option<&ProgressCallback>,
) -> Result<(), PatchError> {
    report(progress, 0, "Reading file header...");
    let file = File::open(source).map_err(PatchError::Io)?;
    let total = file.metadata().map_err(PatchError::Io)?.len();
    let mut reader = BufReader::new(file);

    let mut header = SafetensorsHeader::decode(&mut reader)?;
    // A header whose tensor entries we cannot model is not safe to patch
    // structurally.
    header.tensor_index()?;
    let existing = header.metadata()?;
    header.set_metadata(&merge_metadata(&existing, updates));

    let payload_len = total.saturating_sub(header.payload_offset());

    report(progress, 0, "Creating file...");
    let mut writer = BufWriter::new(File::create(temp_path).map_err(PatchError::Io)?);
    writer.write_all(&header.encode()).map_err(PatchError::Io)?;

    // The reader sits at the first payload byte after decode.
    copy_chunked(&mut reader, &mut writer, payload_len, chunk_size, cancel, |step| {
        report(progress, step, "Copying tensor data...");
    })
    .map_err(|e| match e {
        CopyError::Io(e) => PatchError::Io(e),
        CopyError::Cancelled => PatchError::Cancelled,
    })?;

    writer.flush().map_err(PatchError::Io)?;
    debug!(source = %source.display(), "header patched in place");
    Ok(())
}

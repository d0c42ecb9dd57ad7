//! Error types for the metadata patch engine.
//!
//! The taxonomy mirrors the recovery strategy: `FormatError` (wrapped by
//! `PatchError`) is recoverable and sends the save down the full-rewrite
//! fallback, `FatalError` means the fallback itself failed, and `SaveError`
//! classifies transaction-level failures for user display.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while decoding a safetensors header.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The file ended before the declared byte count was available.
    #[error("file truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// The declared header length exceeds the sanity cap.
    #[error("header length {len} exceeds maximum {max}")]
    HeaderTooLarge { len: u64, max: u64 },

    /// The header bytes are not valid UTF-8 JSON.
    #[error("invalid JSON header: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The header JSON root is not an object.
    #[error("header root is not a JSON object")]
    NotAnObject,

    /// The `__metadata__` block holds a non-string value.
    #[error("metadata value for '{key}' is not a string")]
    InvalidMetadata { key: String },

    /// A tensor index entry does not match the modeled layout.
    #[error("tensor entry '{name}' is malformed: {reason}")]
    InvalidTensorEntry { name: String, reason: String },

    /// The underlying reader failed.
    #[error("I/O error while reading header: {0}")]
    Io(#[from] std::io::Error),
}

/// Fast-path failure. Either discriminant tells the orchestrator to try the
/// full rewrite instead; `Cancelled` aborts the save outright.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The header cannot be patched structurally.
    #[error("header cannot be patched in place: {0}")]
    Format(#[from] FormatError),

    /// Disk failure while writing the patched file.
    #[error("I/O failure during header patch: {0}")]
    Io(#[from] std::io::Error),

    /// The caller cancelled mid-copy.
    #[error("patch cancelled")]
    Cancelled,
}

/// Slow-path failure. There is no further fallback; this aborts the save.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The tensor framework could not load the source file.
    #[error("failed to load tensors from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The tensor framework could not serialize the rewritten file.
    #[error("failed to serialize tensors to {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The caller cancelled mid-load.
    #[error("rewrite cancelled")]
    Cancelled,
}

/// Transaction-level failure surfaced to the caller.
///
/// Whenever one of these is returned the source file is unchanged: the
/// backup is written before any mutation and the atomic rename is the last
/// step of a successful save.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Creating the pre-mutation backup failed; nothing was touched.
    #[error("failed to create backup {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Both the structural patch and the full rewrite failed.
    #[error("save failed: {0}")]
    Fatal(#[from] FatalError),

    /// Replacing the source with the finished temp file failed.
    #[error("failed to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another save against this editor is still in flight.
    #[error("a save is already in progress")]
    SaveInProgress,

    /// The caller cancelled the save.
    #[error("save cancelled")]
    Cancelled,
}

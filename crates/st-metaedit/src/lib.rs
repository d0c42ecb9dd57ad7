//! Metadata patch engine for safetensors model files.
//!
//! Reads and rewrites the `__metadata__` block of a safetensors file
//! without disturbing tensor data. Saves prefer a structural fast path
//! (rewrite the header, stream the payload through byte-for-byte) and fall
//! back to a full tensor round-trip through the safetensors framework when
//! the header cannot be patched in place. Every save runs as a
//! backup-then-atomic-replace transaction, optionally on a background
//! worker with progress events.
//!
//! This crate is the engine only; interactive surfaces sit on top of
//! [`Saver`] and the read functions in [`header`].

pub mod copy;
pub mod error;
pub mod fallback;
pub mod hash;
pub mod header;
pub mod keys;
pub mod patch;
pub mod transaction;

pub use copy::{CancelToken, CopyError, DEFAULT_CHUNK_SIZE, ProgressCallback, copy_chunked};
pub use error::{FatalError, FormatError, PatchError, SaveError};
pub use fallback::rewrite_file;
pub use hash::{payload_sha256, payload_sha256_at};
pub use header::{SafetensorsHeader, TensorInfo, read_header_json, read_metadata};
pub use patch::{merge_metadata, patch_file};
pub use transaction::{
    SaveEvent, SaveHandle, SaveRequest, SaveState, SaveTransaction, Saver,
};

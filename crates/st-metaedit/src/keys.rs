//! The `modelspec.*` metadata key namespace.
//!
//! Key strings follow the modelspec convention for safetensors metadata.
//! Centralizing them here keeps callers free of typos.

/// Reserved header key holding the string-to-string metadata block.
pub const METADATA_KEY: &str = "__metadata__";

pub const TITLE: &str = "modelspec.title";
pub const DESCRIPTION: &str = "modelspec.description";
pub const AUTHOR: &str = "modelspec.author";
/// ISO-8601 UTC, `YYYY-MM-DDTHH:MM:SSZ`. Produced by the caller.
pub const DATE: &str = "modelspec.date";
pub const LICENSE: &str = "modelspec.license";
pub const USAGE_HINT: &str = "modelspec.usage_hint";
/// A `data:image/<fmt>;base64,<...>` string; image encoding is the
/// caller's responsibility.
pub const THUMBNAIL: &str = "modelspec.thumbnail";
pub const TAGS: &str = "modelspec.tags";
pub const MERGED_FROM: &str = "modelspec.merged_from";
/// `"0x"` + lowercase hex SHA-256 of the tensor payload.
pub const HASH_SHA256: &str = "modelspec.hash_sha256";

/// All editor-facing fields, in display order.
pub const MODELSPEC_FIELDS: &[&str] = &[
    TITLE,
    DESCRIPTION,
    AUTHOR,
    DATE,
    LICENSE,
    USAGE_HINT,
    THUMBNAIL,
    TAGS,
    MERGED_FROM,
    HASH_SHA256,
];

/// Whether `key` belongs to the `modelspec` namespace.
pub fn is_modelspec_key(key: &str) -> bool {
    key.starts_with("modelspec.")
}

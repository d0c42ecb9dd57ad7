//! SHA-256 of the tensor payload region.
//!
//! The digest covers every byte after the header, so editing metadata never
//! changes it.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::FormatError;
use crate::header::SafetensorsHeader;

const HASH_BUF_SIZE: usize = 1024 * 1024;

/// Compute `"0x" + lowercase hex` SHA-256 of the payload of the file at
/// `path`, locating the payload from the file's own header.
pub fn payload_sha256(path: &Path) -> Result<String, FormatError> {
    let header = SafetensorsHeader::from_path(path)?;
    let mut file = File::open(path)?;
    Ok(payload_sha256_at(&mut file, header.payload_offset())?)
}

/// Digest all bytes from `payload_offset` to EOF.
pub fn payload_sha256_at<R: Read + Seek>(
    reader: &mut R,
    payload_offset: u64,
) -> std::io::Result<String> {
    reader.seek(SeekFrom::Start(payload_offset))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("0x{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn digest_is_prefixed_lowercase_hex() {
        let mut cursor = Cursor::new(b"payload".to_vec());
        let digest = payload_sha256_at(&mut cursor, 0).unwrap();
        assert!(digest.starts_with("0x"));
        assert_eq!(digest.len(), 2 + 64);
        assert!(digest[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_depends_only_on_payload_range() {
        let mut a = Cursor::new(b"HEADER-Apayload".to_vec());
        let mut b = Cursor::new(b"header-bpayload".to_vec());
        let da = payload_sha256_at(&mut a, 8).unwrap();
        let db = payload_sha256_at(&mut b, 8).unwrap();
        assert_eq!(da, db);
    }

    #[test]
    fn digest_matches_direct_sha256() {
        let payload = b"tensor bytes";
        let mut cursor = Cursor::new(payload.to_vec());
        let expected = format!("0x{:x}", Sha256::digest(payload));
        assert_eq!(payload_sha256_at(&mut cursor, 0).unwrap(), expected);
    }
}

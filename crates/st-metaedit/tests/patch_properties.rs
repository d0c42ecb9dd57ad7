//! Property tests for the structural patch path.

mod common;

use std::collections::HashMap;
use std::fs;

use proptest::prelude::*;
use st_metaedit::{CancelToken, merge_metadata, patch_file, read_metadata};
use tempfile::TempDir;

fn meta_strategy() -> impl Strategy<Value = HashMap<String, String>> {
    proptest::collection::hash_map("[a-z]{1,8}", "[ -~]{0,16}", 0..5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn patch_agrees_with_pure_merge_and_preserves_payload(
        existing in meta_strategy(),
        edits in meta_strategy(),
        payload in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("model.safetensors");
        let temp = dir.path().join("model.safetensors.tmp");
        let tensors = [("w", "U8", &[payload.len() as u64][..], payload.as_slice())];
        fs::write(&source, common::build_safetensors(&tensors, Some(&existing))).unwrap();

        patch_file(&source, &temp, &edits, 16, &CancelToken::new(), None).unwrap();

        prop_assert_eq!(read_metadata(&temp).unwrap(), merge_metadata(&existing, &edits));

        let patched = fs::read(&temp).unwrap();
        prop_assert_eq!(&patched[patched.len() - payload.len()..], payload.as_slice());
    }

    #[test]
    fn patching_twice_is_byte_identical(
        existing in meta_strategy(),
        edits in meta_strategy(),
        payload in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("model.safetensors");
        let once = dir.path().join("once.safetensors");
        let twice = dir.path().join("twice.safetensors");
        let tensors = [("w", "U8", &[payload.len() as u64][..], payload.as_slice())];
        fs::write(&source, common::build_safetensors(&tensors, Some(&existing))).unwrap();

        patch_file(&source, &once, &edits, 16, &CancelToken::new(), None).unwrap();
        patch_file(&once, &twice, &edits, 16, &CancelToken::new(), None).unwrap();

        prop_assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
    }
}

#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use st_metaedit::SafetensorsHeader;

fuzz_target!(|data: &[u8]| {
    // Decode arbitrary bytes as a safetensors header. Any Err result is
    // acceptable — only panics and unbounded allocation are failures.
    let Ok(header) = SafetensorsHeader::decode(&mut Cursor::new(data)) else {
        return;
    };

    // Anything that decoded must survive the accessors and re-encode.
    let _ = header.metadata();
    let _ = header.tensor_index();
    let encoded = header.encode();
    assert!(encoded.len() >= 8);
    let _ = SafetensorsHeader::decode(&mut Cursor::new(&encoded));
});

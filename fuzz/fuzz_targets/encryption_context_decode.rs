//! Fuzz target for the canonical encryption context decoder
//!
//! The decoder should NEVER panic. Anything it accepts must be canonical:
//! serializing the decoded context reproduces the input byte for byte (the
//! one exception is an explicit zero pair count, which decodes to the empty
//! context).

#![no_main]

use latchkey_materials::{deserialize_encryption_context, serialize_encryption_context};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(context) = deserialize_encryption_context(data) else {
        return;
    };

    if context.is_empty() {
        assert!(data.is_empty() || data == [0, 0]);
        return;
    }

    let encoded = serialize_encryption_context(&context).expect("decoded context re-encodes");
    assert_eq!(encoded, data);
});

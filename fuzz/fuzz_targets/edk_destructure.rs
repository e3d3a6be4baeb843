//! Fuzz target for hierarchy EDK ciphertext parsing
//!
//! Feeds arbitrary bytes to `destructure_ciphertext` for every suite, then
//! decompresses the embedded version of anything that parses.
//!
//! # Invariants
//!
//! - Parsing NEVER panics; bad input is an `Err`
//! - Only inputs of exactly the expected length parse
//! - Parsed fields tile the input in order with no gaps

#![no_main]

use latchkey_hierarchy::{decompress_bytes_to_uuidv4, destructure_ciphertext, expected_ciphertext_length};
use latchkey_materials::AlgorithmSuiteId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for id in AlgorithmSuiteId::ALL {
        let suite = id.suite();
        let Ok(parts) = destructure_ciphertext(data, &suite) else {
            assert_ne!(data.len(), expected_ciphertext_length(&suite));
            continue;
        };

        assert_eq!(data.len(), expected_ciphertext_length(&suite));
        assert_eq!(parts.encrypted_key.len(), suite.key_length_bytes());

        let mut rebuilt = Vec::with_capacity(data.len());
        rebuilt.extend_from_slice(parts.salt);
        rebuilt.extend_from_slice(parts.iv);
        rebuilt.extend_from_slice(parts.branch_key_version);
        rebuilt.extend_from_slice(parts.encrypted_key);
        rebuilt.extend_from_slice(parts.auth_tag);
        assert_eq!(rebuilt, data);

        // Arbitrary version bytes are usually not a UUIDv4; must not panic
        let _ = decompress_bytes_to_uuidv4(parts.branch_key_version);
    }
});

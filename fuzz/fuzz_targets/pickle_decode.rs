//! Fuzz target for opening pickles
//!
//! Feeds arbitrary bytes to `open_pickle` under a fixed key and under a key
//! taken from the input. Finds:
//! - Panics in envelope parsing or CBOR decoding
//! - Snapshots that restore caches beyond configured bounds
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vesper_crypto::{open_pickle, Pickle, PickleKey, SessionConfig};

fuzz_target!(|data: &[u8]| {
    let config = SessionConfig { max_skipped_keys: 4, ..SessionConfig::default() };
    let pickle = Pickle::from_bytes(data.to_vec());

    if let Ok(state) = open_pickle(&pickle, &PickleKey::new([0x01; 32]), &config) {
        assert!(state.skipped_key_count() <= config.max_skipped_keys);
    }

    if data.len() >= 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(&data[..32]);
        let pickle = Pickle::from_bytes(data[32..].to_vec());
        let _ = open_pickle(&pickle, &PickleKey::new(key), &config);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Pickle::from_base64(text);
    }
});

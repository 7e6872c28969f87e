//! Fuzz target for message parsing
//!
//! Tests `Message::decode` and `Message::from_base64` with arbitrary input.
//!
//! # Invariants
//!
//! - Never panics
//! - Anything that decodes re-encodes to the same bytes
//! - Decoded bodies always hold at least a tag

#![no_main]

use libfuzzer_sys::fuzz_target;
use vesper_crypto::{Message, MessageHeader, TAG_SIZE};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        assert_eq!(message.encode(), data);
        assert_eq!(message.header().version(), MessageHeader::VERSION);
        assert!(message.body().len() >= TAG_SIZE);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Message::from_base64(text);
    }
});

//! Fuzz target for the host bridge
//!
//! Splits the input into pickle text, key bytes and ciphertext text and calls
//! every bridge entry point with them.
//!
//! # Invariants
//!
//! - Never panics
//! - `decrypt_event` yields exactly one of plaintext or error
//! - Errors are always stage-prefixed

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vesper_bridge::{decrypt_and_repickle, decrypt_event, encrypt_event, release_outcome};
use vesper_crypto::CryptoContext;

#[derive(Debug, Arbitrary)]
struct Input {
    pickled_session: String,
    pickle_key: Vec<u8>,
    ciphertext: String,
}

fuzz_target!(|input: Input| {
    let ctx = CryptoContext::system();

    let outcome =
        decrypt_event(&ctx, &input.pickled_session, &input.pickle_key, &input.ciphertext);
    assert!(outcome.plaintext().is_some() ^ outcome.error().is_some());
    if let Some(error) = outcome.error() {
        let text = error.as_str();
        assert!(text.starts_with("Invalid input: ") || text.starts_with("Decryption failed: "));
    }
    release_outcome(outcome);

    let _ =
        decrypt_and_repickle(&ctx, &input.pickled_session, &input.pickle_key, &input.ciphertext);
    let _ = encrypt_event(&ctx, &input.pickled_session, &input.pickle_key, &input.ciphertext);
});

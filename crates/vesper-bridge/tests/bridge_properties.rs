//! Property-based tests for the host bridge
//!
//! 1. **One of two**: every call yields exactly one of plaintext or error
//! 2. **No panics**: arbitrary text and key bytes never abort the host
//! 3. **Prefix format**: exported buffers are `len:u32be | bytes`

use proptest::prelude::*;
use vesper_bridge::{DecryptOutcome, LENGTH_PREFIX_SIZE, decrypt_event, release_outcome};
use vesper_crypto::{CryptoContext, PickleKey};

const KEY: [u8; 32] = [0x01; 32];

fn session_and_ciphertext(plaintext: &str) -> (String, String) {
    let ctx = CryptoContext::system();
    let shared = [0x21; 32];
    let bob_secret = ctx.generate_ratchet_secret();
    let mut alice = ctx.create_outbound_session(&shared, bob_secret.public_key()).unwrap();
    let bob = ctx.create_inbound_session(&shared, bob_secret);

    let pickle = ctx.pickle(&bob, &PickleKey::new(KEY)).to_base64();
    let ciphertext = ctx.encrypt(&mut alice, plaintext.as_bytes()).unwrap().to_base64();
    (pickle, ciphertext)
}

fn assert_one_of_two(outcome: &DecryptOutcome) {
    assert!(outcome.plaintext().is_some() ^ outcome.error().is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_garbage_inputs_yield_error(
        pickled in ".{0,200}",
        key in prop::collection::vec(any::<u8>(), 0..64),
        ciphertext in ".{0,200}",
    ) {
        let ctx = CryptoContext::system();
        let outcome = decrypt_event(&ctx, &pickled, &key, &ciphertext);

        assert_one_of_two(&outcome);
        prop_assert!(!outcome.is_success());
        release_outcome(outcome);
    }

    #[test]
    fn prop_valid_inputs_roundtrip_text(text in "\\PC{0,256}") {
        let ctx = CryptoContext::system();
        let (pickled, ciphertext) = session_and_ciphertext(&text);

        let outcome = decrypt_event(&ctx, &pickled, &KEY, &ciphertext);

        assert_one_of_two(&outcome);
        let plaintext = outcome.plaintext().unwrap();
        prop_assert_eq!(plaintext.as_str(), text.as_str());

        let exported = plaintext.to_length_prefixed();
        let (prefix, body) = exported.split_at(LENGTH_PREFIX_SIZE);
        prop_assert_eq!(u32::from_be_bytes(prefix.try_into().unwrap()) as usize, text.len());
        prop_assert_eq!(body, text.as_bytes());
    }

    #[test]
    fn prop_wrong_key_yields_error(key in any::<[u8; 32]>()) {
        prop_assume!(key != KEY);
        let ctx = CryptoContext::system();
        let (pickled, ciphertext) = session_and_ciphertext("secret");

        let outcome = decrypt_event(&ctx, &pickled, &key, &ciphertext);

        assert_one_of_two(&outcome);
        prop_assert!(outcome.error().unwrap().as_str().starts_with("Decryption failed: "));
    }
}

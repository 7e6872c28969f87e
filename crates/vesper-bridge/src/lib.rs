//! Vesper Host Bridge
//!
//! The boundary a host application (e.g. a notification extension) calls to
//! decrypt one message with a pickled session. Inputs are plain text and key
//! bytes; the result is exactly one of a plaintext buffer or an error buffer.
//!
//! ```text
//! (pickled session, pickle key, ciphertext)
//!        │
//!        ▼ validate inputs
//! CryptoContext::unpickle ──► SessionState ──► CryptoContext::decrypt
//!        │
//!        ▼
//! DecryptOutcome::Plaintext(buffer) | DecryptOutcome::Error(buffer)
//! ```
//!
//! # Ownership
//!
//! Buffers are owned Rust values. The host releases them with
//! [`release_outcome`] / [`release_buffer`] or simply by dropping them; both
//! paths zeroize the contents exactly once.
//!
//! # Persistence
//!
//! [`decrypt_event`] discards the advanced session, so decrypting from the
//! same pickle twice works. Hosts that want replay protection across calls
//! use [`decrypt_and_repickle`] and store the returned pickle.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod buffer;
pub mod error;

pub use buffer::{LENGTH_PREFIX_SIZE, MAX_BUFFER_LEN, OwnedBuffer};
pub use error::BridgeError;
use vesper_crypto::{CryptoContext, Environment, Message, Pickle, PickleKey, SessionState};
use zeroize::Zeroize;

/// Result of [`decrypt_event`]: exactly one of plaintext or error.
#[derive(Debug)]
pub enum DecryptOutcome {
    /// Decrypted UTF-8 plaintext
    Plaintext(OwnedBuffer),
    /// Human-readable error message
    Error(OwnedBuffer),
}

impl DecryptOutcome {
    /// Plaintext buffer, if decryption succeeded.
    pub fn plaintext(&self) -> Option<&OwnedBuffer> {
        match self {
            Self::Plaintext(buffer) => Some(buffer),
            Self::Error(_) => None,
        }
    }

    /// Error buffer, if decryption failed.
    pub fn error(&self) -> Option<&OwnedBuffer> {
        match self {
            Self::Plaintext(_) => None,
            Self::Error(buffer) => Some(buffer),
        }
    }

    /// Whether decryption succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Plaintext(_))
    }

    /// Split into the two optional buffers the host stores separately.
    ///
    /// Exactly one side is `Some`.
    pub fn into_parts(self) -> (Option<OwnedBuffer>, Option<OwnedBuffer>) {
        match self {
            Self::Plaintext(buffer) => (Some(buffer), None),
            Self::Error(buffer) => (None, Some(buffer)),
        }
    }

    fn from_error(err: &BridgeError) -> Self {
        tracing::warn!(error = %err, transient = err.is_transient(), "decrypt_event failed");
        match OwnedBuffer::new(err.to_string()) {
            Some(buffer) => Self::Error(buffer),
            None => unreachable!("error messages fit a length-prefixed buffer"),
        }
    }
}

/// Plaintext plus the advanced session, sealed again.
#[derive(Debug)]
pub struct RepickledDecrypt {
    /// Decrypted UTF-8 plaintext
    pub plaintext: OwnedBuffer,
    /// Advanced session, base64 pickle under the same key
    pub pickled_session: String,
}

/// Ciphertext plus the advanced session, sealed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEvent {
    /// Base64 message for the transport
    pub ciphertext: String,
    /// Advanced session, base64 pickle under the same key
    pub pickled_session: String,
}

/// Decrypt `ciphertext` with the session in `pickled_session`.
///
/// The advanced session is discarded. Never panics on bad input: every
/// failure becomes [`DecryptOutcome::Error`].
pub fn decrypt_event<E: Environment>(
    ctx: &CryptoContext<E>,
    pickled_session: &str,
    pickle_key: &[u8],
    ciphertext: &str,
) -> DecryptOutcome {
    let result = decrypt_internal(ctx, pickled_session, pickle_key, ciphertext)
        .and_then(|(plaintext, _, _)| into_plaintext_buffer(plaintext));

    match result {
        Ok(buffer) => {
            tracing::debug!(bytes = buffer.len(), "decrypt_event succeeded");
            DecryptOutcome::Plaintext(buffer)
        }
        Err(err) => DecryptOutcome::from_error(&err),
    }
}

/// Decrypt `ciphertext` and return the advanced session re-pickled.
///
/// # Errors
///
/// - `BridgeError::EmptyInput` / `BridgeError::InvalidKey` for bad arguments
/// - `BridgeError::Decrypt` if the pickle does not open or the message does
///   not decrypt
/// - `BridgeError::NonUtf8Plaintext` if the plaintext is not text
pub fn decrypt_and_repickle<E: Environment>(
    ctx: &CryptoContext<E>,
    pickled_session: &str,
    pickle_key: &[u8],
    ciphertext: &str,
) -> Result<RepickledDecrypt, BridgeError> {
    let (plaintext, state, key) =
        decrypt_internal(ctx, pickled_session, pickle_key, ciphertext)?;
    let plaintext = into_plaintext_buffer(plaintext)?;

    Ok(RepickledDecrypt { plaintext, pickled_session: ctx.pickle(&state, &key).to_base64() })
}

/// Encrypt `plaintext` with the session in `pickled_session`.
///
/// # Errors
///
/// - `BridgeError::EmptyInput` / `BridgeError::InvalidKey` for bad arguments
/// - `BridgeError::Encrypt` if the pickle does not open or the session cannot
///   send yet
pub fn encrypt_event<E: Environment>(
    ctx: &CryptoContext<E>,
    pickled_session: &str,
    pickle_key: &[u8],
    plaintext: &str,
) -> Result<EncryptedEvent, BridgeError> {
    require_non_empty("pickled_session", pickled_session)?;
    let key = parse_key(pickle_key)?;

    let mut state = Pickle::from_base64(pickled_session)
        .and_then(|pickle| ctx.unpickle(&pickle, &key))
        .map_err(|err| BridgeError::Encrypt(err.into()))?;
    let message = ctx
        .encrypt(&mut state, plaintext.as_bytes())
        .map_err(|err| BridgeError::Encrypt(err.into()))?;

    Ok(EncryptedEvent {
        ciphertext: message.to_base64(),
        pickled_session: ctx.pickle(&state, &key).to_base64(),
    })
}

/// Release both buffers of an outcome.
pub fn release_outcome(outcome: DecryptOutcome) {
    drop(outcome);
}

/// Release one buffer. Releasing `None` does nothing.
pub fn release_buffer(buffer: Option<OwnedBuffer>) {
    drop(buffer);
}

/// Returns the plaintext, the advanced session and the parsed key so the
/// caller can re-pickle without parsing the key again.
fn decrypt_internal<E: Environment>(
    ctx: &CryptoContext<E>,
    pickled_session: &str,
    pickle_key: &[u8],
    ciphertext: &str,
) -> Result<(Vec<u8>, SessionState, PickleKey), BridgeError> {
    require_non_empty("pickled_session", pickled_session)?;
    require_non_empty("ciphertext", ciphertext)?;
    let key = parse_key(pickle_key)?;

    let pickle =
        Pickle::from_base64(pickled_session).map_err(|err| BridgeError::Decrypt(err.into()))?;
    let message = Message::from_base64(ciphertext)?;

    let (plaintext, state) =
        ctx.decrypt_pickled(&pickle, &key, &message).map_err(BridgeError::Decrypt)?;
    Ok((plaintext, state, key))
}

fn into_plaintext_buffer(plaintext: Vec<u8>) -> Result<OwnedBuffer, BridgeError> {
    let text = String::from_utf8(plaintext).map_err(|err| {
        let mut bytes = err.into_bytes();
        bytes.zeroize();
        BridgeError::NonUtf8Plaintext
    })?;
    OwnedBuffer::new(text).ok_or(BridgeError::OutputTooLarge)
}

fn parse_key(pickle_key: &[u8]) -> Result<PickleKey, BridgeError> {
    PickleKey::from_slice(pickle_key).map_err(BridgeError::InvalidKey)
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), BridgeError> {
    if value.trim().is_empty() {
        return Err(BridgeError::EmptyInput { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use vesper_crypto::{PickleError, SessionError};

    use super::*;

    const KEY: [u8; 32] = *b"01234567890123456789012345678901";

    /// Pickled inbound session and a ciphertext addressed to it.
    fn pickled_with_message(text: &[u8]) -> (String, String) {
        let ctx = CryptoContext::system();
        let shared = [0x44; 32];
        let bob_secret = ctx.generate_ratchet_secret();
        let mut alice = ctx.create_outbound_session(&shared, bob_secret.public_key()).unwrap();
        let bob = ctx.create_inbound_session(&shared, bob_secret);

        let pickle = ctx.pickle(&bob, &PickleKey::new(KEY)).to_base64();
        let ciphertext = ctx.encrypt(&mut alice, text).unwrap().to_base64();
        (pickle, ciphertext)
    }

    #[test]
    fn decrypts_notification_payload() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"Hello, Notification Extension!");

        let outcome = decrypt_event(&ctx, &pickle, &KEY, &ciphertext);

        assert!(outcome.error().is_none());
        assert_eq!(outcome.plaintext().unwrap().as_str(), "Hello, Notification Extension!");
        release_outcome(outcome);
    }

    #[test]
    fn invalid_pickle_yields_error_only() {
        let ctx = CryptoContext::system();
        let outcome = decrypt_event(&ctx, "invalid_base64_pickle!", &KEY, "some_ciphertext");

        assert!(outcome.plaintext().is_none());
        let error = outcome.error().unwrap().as_str().to_owned();
        assert!(error.starts_with("Decryption failed: "), "{error}");
    }

    #[test]
    fn short_key_is_invalid_input() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"x");

        let outcome = decrypt_event(&ctx, &pickle, &KEY[..31], &ciphertext);
        assert_eq!(
            outcome.error().unwrap().as_str(),
            BridgeError::InvalidKey(PickleError::InvalidKeyLength { expected: 32, actual: 31 })
                .to_string()
        );
    }

    #[test]
    fn empty_inputs_are_invalid() {
        let ctx = CryptoContext::system();

        let outcome = decrypt_event(&ctx, "", &KEY, "abc");
        assert_eq!(outcome.error().unwrap().as_str(), "Invalid input: pickled_session is empty");

        let outcome = decrypt_event(&ctx, "abc", &KEY, "  ");
        assert_eq!(outcome.error().unwrap().as_str(), "Invalid input: ciphertext is empty");
    }

    #[test]
    fn wrong_key_reports_bad_key() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"x");

        let outcome = decrypt_event(&ctx, &pickle, &[0x02; 32], &ciphertext);
        assert_eq!(
            outcome.error().unwrap().as_str(),
            "Decryption failed: pickle key does not match this pickle"
        );
    }

    #[test]
    fn non_utf8_plaintext_is_rejected() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(&[0xFF, 0xFE, 0x00]);

        let outcome = decrypt_event(&ctx, &pickle, &KEY, &ciphertext);
        assert_eq!(outcome.error().unwrap().as_str(), BridgeError::NonUtf8Plaintext.to_string());
    }

    #[test]
    fn repickled_session_rejects_replay() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"once");

        let first = decrypt_and_repickle(&ctx, &pickle, &KEY, &ciphertext).unwrap();
        assert_eq!(first.plaintext.as_str(), "once");

        let replay = decrypt_and_repickle(&ctx, &first.pickled_session, &KEY, &ciphertext);
        assert_eq!(
            replay.unwrap_err(),
            BridgeError::from(SessionError::ReplayOrUnknownMessage { index: 0 })
        );

        // The original pickle was not advanced
        assert!(decrypt_event(&ctx, &pickle, &KEY, &ciphertext).is_success());
    }

    #[test]
    fn repickled_session_opens_under_caller_key() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"advance");

        let received = decrypt_and_repickle(&ctx, &pickle, &KEY, &ciphertext).unwrap();

        let repickled = Pickle::from_base64(&received.pickled_session).unwrap();
        let state = ctx.unpickle(&repickled, &PickleKey::new(KEY)).unwrap();
        assert!(state.has_received_message());
        assert_eq!(
            ctx.unpickle(&repickled, &PickleKey::new([0x02; 32])).unwrap_err(),
            PickleError::BadKey
        );
    }

    #[test]
    fn reply_through_bridge() {
        let ctx = CryptoContext::system();
        let (pickle, ciphertext) = pickled_with_message(b"hello");

        let received = decrypt_and_repickle(&ctx, &pickle, &KEY, &ciphertext).unwrap();
        let reply = encrypt_event(&ctx, &received.pickled_session, &KEY, "hi back").unwrap();

        assert!(!reply.ciphertext.is_empty());
        assert_ne!(reply.pickled_session, received.pickled_session);
    }

    #[test]
    fn fresh_inbound_session_cannot_encrypt() {
        let ctx = CryptoContext::system();
        let (pickle, _) = pickled_with_message(b"unused");

        let result = encrypt_event(&ctx, &pickle, &KEY, "too early");
        assert_eq!(
            result.unwrap_err(),
            BridgeError::Encrypt(SessionError::NotEstablished.into())
        );
    }

    #[test]
    fn release_none_is_noop() {
        release_buffer(None);

        let outcome = DecryptOutcome::from_error(&BridgeError::OutputTooLarge);
        let (plaintext, error) = outcome.into_parts();
        assert!(plaintext.is_none());
        release_buffer(error);
    }
}

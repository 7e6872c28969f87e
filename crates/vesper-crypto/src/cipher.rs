//! Message body encryption using `XChaCha20-Poly1305`
//!
//! Every message key is used once, so the AEAD key and nonce are both expanded
//! from it with HKDF instead of drawing a random nonce. The message header is
//! bound as associated data.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    error::SessionError,
    keys::KEY_SIZE,
    message::{Message, MessageHeader},
    ratchet::MessageKey,
};

/// Label for expanding a message key into AEAD key and nonce
const AEAD_LABEL: &[u8] = b"vesperMessageKeysV1";

/// `XChaCha20` nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

/// Encrypt `plaintext` under `message_key`, producing a complete message.
pub(crate) fn seal(message_key: &MessageKey, header: MessageHeader, plaintext: &[u8]) -> Message {
    let (cipher, nonce) = expand(message_key);

    let payload = Payload { msg: plaintext, aad: header.as_bytes() };
    let Ok(body) = cipher.encrypt(&nonce, payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Message::new(header, body)
}

/// Decrypt and authenticate a message body.
///
/// # Errors
///
/// - `SessionError::AuthenticationFailed` if the tag does not verify (wrong key,
///   tampered header or tampered body)
pub(crate) fn open(message_key: &MessageKey, message: &Message) -> Result<Vec<u8>, SessionError> {
    let (cipher, nonce) = expand(message_key);

    let payload = Payload { msg: message.body(), aad: message.header().as_bytes() };
    cipher.decrypt(&nonce, payload).map_err(|_| SessionError::AuthenticationFailed)
}

fn expand(message_key: &MessageKey) -> (XChaCha20Poly1305, XNonce) {
    let hkdf = Hkdf::<Sha256>::new(None, message_key.key());

    let mut okm = [0u8; KEY_SIZE + NONCE_SIZE];
    let Ok(()) = hkdf.expand(AEAD_LABEL, &mut okm) else {
        unreachable!("56 bytes is a valid HKDF-SHA256 output length");
    };

    let cipher = XChaCha20Poly1305::new_from_slice(&okm[..KEY_SIZE])
        .unwrap_or_else(|_| unreachable!("slice is exactly 32 bytes"));
    let nonce = XNonce::clone_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    (cipher, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::RatchetPublicKey, message::TAG_SIZE, ratchet::ChainKey};

    fn key_at(index: u32) -> MessageKey {
        let mut chain = ChainKey::new([0x42; 32]);
        let (_, key) = chain.advance_to(index, 1000).unwrap();
        key
    }

    fn header(index: u32) -> MessageHeader {
        MessageHeader::new(RatchetPublicKey::from([0x33; 32]), 0, index)
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = key_at(0);
        let message = seal(&key, header(0), b"Hello, World!");

        assert_eq!(open(&key, &message).unwrap(), b"Hello, World!");
    }

    #[test]
    fn body_is_plaintext_plus_tag() {
        let key = key_at(0);
        let message = seal(&key, header(0), b"test message");

        assert_eq!(message.body().len(), b"test message".len() + TAG_SIZE);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let message = seal(&key_at(0), header(0), b"secret");

        assert_eq!(open(&key_at(1), &message), Err(SessionError::AuthenticationFailed));
    }

    #[test]
    fn tampered_body_fails_authentication() {
        let key = key_at(2);
        let message = seal(&key, header(2), b"original message");

        let mut bytes = message.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Message::decode(&bytes).unwrap();

        assert_eq!(open(&key, &tampered), Err(SessionError::AuthenticationFailed));
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let key = key_at(0);
        let message = seal(&key, header(0), b"bound to header");

        let mut bytes = message.encode();
        bytes[35] ^= 0x80; // previous_chain_length
        let tampered = Message::decode(&bytes).unwrap();

        assert_eq!(open(&key, &tampered), Err(SessionError::AuthenticationFailed));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = key_at(0);
        let message = seal(&key, header(0), b"");

        assert!(open(&key, &message).unwrap().is_empty());
    }
}

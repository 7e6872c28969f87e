//! Key material types
//!
//! Secret types zeroize on drop, compare in constant time and never print
//! their bytes. Public ratchet keys are plain values.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::error::PickleError;

/// Length of every symmetric key and X25519 key in this crate.
pub const KEY_SIZE: usize = 32;

/// Caller-supplied 256-bit key that seals and opens pickles.
///
/// Never persisted by this crate. The bytes are zeroized when the key is
/// dropped.
pub struct PickleKey {
    key: [u8; KEY_SIZE],
}

impl PickleKey {
    /// Wrap a 32-byte key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Copy a key out of an untyped buffer.
    ///
    /// # Errors
    ///
    /// - `PickleError::InvalidKeyLength` if `bytes` is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PickleError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| PickleError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { key })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl From<[u8; KEY_SIZE]> for PickleKey {
    fn from(key: [u8; KEY_SIZE]) -> Self {
        Self::new(key)
    }
}

impl Drop for PickleKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PickleKey([redacted])")
    }
}

/// Public half of a ratchet key pair, as carried in message headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatchetPublicKey([u8; KEY_SIZE]);

impl RatchetPublicKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Unpadded standard base64 encoding of the key.
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }
}

impl From<[u8; KEY_SIZE]> for RatchetPublicKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for RatchetPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RatchetPublicKey({})", self.to_base64())
    }
}

/// Private half of our current ratchet key pair.
pub struct RatchetSecret {
    bytes: [u8; KEY_SIZE],
}

impl RatchetSecret {
    /// Use 32 uniformly random bytes as an X25519 secret.
    ///
    /// Clamping happens inside the scalar multiplication, so any 32 bytes are
    /// a valid secret.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Public key matching this secret.
    pub fn public_key(&self) -> RatchetPublicKey {
        let secret = StaticSecret::from(self.bytes);
        RatchetPublicKey(PublicKey::from(&secret).to_bytes())
    }

    /// X25519 agreement with a remote ratchet key.
    ///
    /// Returns `None` when the remote key is a low-order point and the output
    /// carries no contribution from our secret.
    pub(crate) fn diffie_hellman(&self, remote: &RatchetPublicKey) -> Option<SharedSecret> {
        let secret = StaticSecret::from(self.bytes);
        let shared = secret.diffie_hellman(&PublicKey::from(remote.0));
        shared.was_contributory().then_some(shared)
    }

    pub(crate) fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.bytes
    }
}

impl Clone for RatchetSecret {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl PartialEq for RatchetSecret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for RatchetSecret {}

impl Drop for RatchetSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for RatchetSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RatchetSecret(public: {:?})", self.public_key())
    }
}

/// Root of the key schedule, replaced on every DH ratchet step.
pub(crate) struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    pub(crate) fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Clone for RootKey {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for RootKey {}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey([redacted])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pickle_key_rejects_wrong_length() {
        let result = PickleKey::from_slice(&[0u8; 31]);
        assert_eq!(result.err(), Some(PickleError::InvalidKeyLength { expected: 32, actual: 31 }));

        let result = PickleKey::from_slice(&[0u8; 33]);
        assert!(matches!(result, Err(PickleError::InvalidKeyLength { actual: 33, .. })));
    }

    #[test]
    fn pickle_key_accepts_exact_length() {
        let key = PickleKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = PickleKey::new([0xAA; 32]);
        assert_eq!(format!("{key:?}"), "PickleKey([redacted])");

        let root = RootKey::new([0xAA; 32]);
        assert!(!format!("{root:?}").contains("170"));
    }

    #[test]
    fn diffie_hellman_agrees_both_ways() {
        let alice = RatchetSecret::from_bytes([1u8; 32]);
        let bob = RatchetSecret::from_bytes([2u8; 32]);

        let ab = alice.diffie_hellman(&bob.public_key()).unwrap();
        let ba = bob.diffie_hellman(&alice.public_key()).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn diffie_hellman_rejects_low_order_point() {
        let secret = RatchetSecret::from_bytes([3u8; 32]);
        let identity = RatchetPublicKey::from([0u8; 32]);

        assert!(secret.diffie_hellman(&identity).is_none());
    }

    #[test]
    fn secrets_compare_by_value() {
        assert_eq!(RatchetSecret::from_bytes([5u8; 32]), RatchetSecret::from_bytes([5u8; 32]));
        assert_ne!(RatchetSecret::from_bytes([5u8; 32]), RatchetSecret::from_bytes([6u8; 32]));
    }
}

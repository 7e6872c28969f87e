//! Symmetric chain ratchet for per-message key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: the old chain key is zeroized when advancing
//! - Key Uniqueness: each chain index produces a unique message key
//! - Determinism: the same chain key always produces the same key sequence

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{error::SessionError, keys::KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// A message key derived from a chain.
///
/// Decrypts or encrypts exactly one message and is then dropped (or held in
/// the skipped-key cache until its message arrives).
pub struct MessageKey {
    /// The 32-byte key fed into the AEAD key schedule
    key: [u8; KEY_SIZE],
    /// The chain index this key was derived at
    index: u32,
}

impl MessageKey {
    pub(crate) fn from_parts(key: [u8; KEY_SIZE], index: u32) -> Self {
        Self { key, index }
    }

    /// 32-byte key material.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Chain index this key was derived at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Forward-secure symmetric chain.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key (forward secrecy)
///
/// Cloning is used to trial-advance a chain before committing the result.
#[derive(Clone)]
pub struct ChainKey {
    /// Current chain key (32 bytes)
    key: [u8; KEY_SIZE],
    /// Index of the next message key this chain will produce
    index: u32,
}

impl ChainKey {
    /// Start a chain at index 0 from freshly derived key material.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key, index: 0 }
    }

    pub(crate) fn from_parts(key: [u8; KEY_SIZE], index: u32) -> Self {
        Self { key, index }
    }

    /// Index of the next message key.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Advance the chain and return the message key for the current index.
    ///
    /// # Errors
    ///
    /// - `SessionError::CounterOverflow` if the index is already `u32::MAX`
    pub fn advance(&mut self) -> Result<MessageKey, SessionError> {
        if self.index == u32::MAX {
            return Err(SessionError::CounterOverflow { current: self.index });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        // Zeroize and replace the old chain key for forward secrecy
        self.key.zeroize();
        self.key = next_chain_key;

        let current = self.index;
        self.index += 1;

        Ok(MessageKey { key: message_key, index: current })
    }

    /// Advance until the key for `target` is produced.
    ///
    /// Keys for indices between the current position and `target` are
    /// returned in order so the caller can cache them.
    ///
    /// # Errors
    ///
    /// - `SessionError::ReplayOrUnknownMessage` if `target` is behind the chain
    /// - `SessionError::MessageGapTooLarge` if more than `max_skip` keys would
    ///   be skipped
    pub fn advance_to(
        &mut self,
        target: u32,
        max_skip: u32,
    ) -> Result<(Vec<MessageKey>, MessageKey), SessionError> {
        if target < self.index {
            return Err(SessionError::ReplayOrUnknownMessage { index: target });
        }

        let skip_count = target - self.index;
        if skip_count > max_skip {
            return Err(SessionError::MessageGapTooLarge {
                current: self.index,
                requested: target,
            });
        }

        let mut skipped = Vec::with_capacity(skip_count as usize);
        while self.index < target {
            skipped.push(self.advance()?);
        }

        let message_key = self.advance()?;
        Ok((skipped, message_key))
    }

    /// Advance until the chain sits at `end`, returning every key passed.
    ///
    /// Used to harvest the tail of a receiving chain before it is replaced.
    /// A chain already at or past `end` yields nothing.
    pub fn skip_until(&mut self, end: u32, max_skip: u32) -> Result<Vec<MessageKey>, SessionError> {
        if end <= self.index {
            return Ok(Vec::new());
        }

        let skip_count = end - self.index;
        if skip_count > max_skip {
            return Err(SessionError::MessageGapTooLarge { current: self.index, requested: end });
        }

        let mut skipped = Vec::with_capacity(skip_count as usize);
        while self.index < end {
            skipped.push(self.advance()?);
        }
        Ok(skipped)
    }

    fn derive(&self, label: &[u8]) -> [u8; KEY_SIZE] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&result);
        key
    }
}

impl PartialEq for ChainKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.index == other.index && bool::from(self.key.ct_eq(&other.key))
    }
}

impl Eq for ChainKey {}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainKey").field("index", &self.index).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn new_chain_starts_at_index_zero() {
        let chain = ChainKey::new(test_seed());
        assert_eq!(chain.index(), 0);
    }

    #[test]
    fn advance_increments_index() {
        let mut chain = ChainKey::new(test_seed());

        let key0 = chain.advance().unwrap();
        assert_eq!(key0.index(), 0);
        assert_eq!(chain.index(), 1);

        let key1 = chain.advance().unwrap();
        assert_eq!(key1.index(), 1);
        assert_eq!(chain.index(), 2);
    }

    #[test]
    fn advance_produces_unique_keys() {
        let mut chain = ChainKey::new(test_seed());

        let key0 = chain.advance().unwrap();
        let key1 = chain.advance().unwrap();
        let key2 = chain.advance().unwrap();

        assert_ne!(key0.key(), key1.key(), "keys must be unique");
        assert_ne!(key1.key(), key2.key(), "keys must be unique");
        assert_ne!(key0.key(), key2.key(), "keys must be unique");
    }

    #[test]
    fn message_key_differs_from_next_chain_key() {
        let mut chain = ChainKey::new(test_seed());
        let key0 = chain.advance().unwrap();

        assert_ne!(key0.key(), chain.key_bytes());
    }

    #[test]
    fn advance_to_returns_skipped_keys_in_order() {
        let mut chain = ChainKey::new(test_seed());

        let (skipped, key) = chain.advance_to(3, 1000).unwrap();

        let indices: Vec<u32> = skipped.iter().map(MessageKey::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(key.index(), 3);
        assert_eq!(chain.index(), 4);
    }

    #[test]
    fn advance_to_matches_sequential_advance() {
        let mut sequential = ChainKey::new(test_seed());
        for _ in 0..5 {
            sequential.advance().unwrap();
        }
        let key_sequential = sequential.advance().unwrap();

        let mut skipping = ChainKey::new(test_seed());
        let (_, key_skip) = skipping.advance_to(5, 1000).unwrap();

        assert_eq!(key_sequential.key(), key_skip.key());
        assert_eq!(sequential, skipping);
    }

    #[test]
    fn advance_to_rejects_past_index() {
        let mut chain = ChainKey::new(test_seed());
        chain.advance_to(5, 1000).unwrap();

        let result = chain.advance_to(3, 1000);
        assert!(matches!(result, Err(SessionError::ReplayOrUnknownMessage { index: 3 })));
    }

    #[test]
    fn advance_to_rejects_too_far_ahead() {
        let mut chain = ChainKey::new(test_seed());

        let result = chain.advance_to(1100, 1000);
        assert!(matches!(
            result,
            Err(SessionError::MessageGapTooLarge { current: 0, requested: 1100 })
        ));
        assert_eq!(chain.index(), 0, "rejected advance must not move the chain");
    }

    #[test]
    fn skip_until_collects_tail() {
        let mut chain = ChainKey::new(test_seed());
        chain.advance().unwrap();

        let tail = chain.skip_until(4, 1000).unwrap();
        let indices: Vec<u32> = tail.iter().map(MessageKey::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(chain.index(), 4);

        assert!(chain.skip_until(2, 1000).unwrap().is_empty());
    }

    #[test]
    fn known_answer_vectors() {
        let mut chain = ChainKey::new([0x42; 32]);

        let key0 = chain.advance().unwrap();
        let key1 = chain.advance().unwrap();

        assert_eq!(
            hex::encode(key0.key()),
            "50fc210a19160126883e2d4d13d0704f7e7ca02a8700387b7cbb502fd6a7209c"
        );
        assert_eq!(
            hex::encode(key1.key()),
            "273ae432deaa9ce9f7ef407c6bd75b9811ea61560ffcbf84761ae3f94899c3e8"
        );
    }

    #[test]
    fn advance_rejects_overflow() {
        let mut chain = ChainKey::from_parts(test_seed(), u32::MAX);
        assert!(matches!(chain.advance(), Err(SessionError::CounterOverflow { .. })));
    }
}

//! Bounded cache of message keys derived ahead of their messages

use std::collections::VecDeque;

use super::chain::MessageKey;
use crate::keys::RatchetPublicKey;

/// A message key waiting for a message that has not arrived yet.
pub(crate) struct SkippedKey {
    pub(crate) ratchet_key: RatchetPublicKey,
    pub(crate) key: MessageKey,
}

/// Skipped message keys indexed by `(ratchet key, chain index)`.
///
/// # Invariants
///
/// - Holds at most `capacity` entries; inserting into a full cache evicts the
///   oldest entry first
/// - Each `(ratchet key, index)` pair appears at most once
/// - A key leaves the cache exactly once: by eviction or by
///   [`take`](Self::take)
#[derive(Default)]
pub(crate) struct SkippedKeyCache {
    entries: VecDeque<SkippedKey>,
}

impl SkippedKeyCache {
    pub(crate) fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Oldest-first iterator, used when pickling.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &SkippedKey> {
        self.entries.iter()
    }

    /// Insert a key, evicting the oldest entries beyond `capacity`.
    ///
    /// Returns the number of evicted entries.
    pub(crate) fn insert(
        &mut self,
        ratchet_key: RatchetPublicKey,
        key: MessageKey,
        capacity: usize,
    ) -> usize {
        if capacity == 0 {
            return 1;
        }

        if self.contains(&ratchet_key, key.index()) {
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= capacity {
            self.entries.pop_front();
            evicted += 1;
        }

        self.entries.push_back(SkippedKey { ratchet_key, key });
        evicted
    }

    pub(crate) fn contains(&self, ratchet_key: &RatchetPublicKey, index: u32) -> bool {
        self.position(ratchet_key, index).is_some()
    }

    pub(crate) fn get(&self, ratchet_key: &RatchetPublicKey, index: u32) -> Option<&MessageKey> {
        self.position(ratchet_key, index).and_then(|pos| self.entries.get(pos)).map(|e| &e.key)
    }

    /// Remove and return a key once its message has been decrypted.
    pub(crate) fn take(
        &mut self,
        ratchet_key: &RatchetPublicKey,
        index: u32,
    ) -> Option<MessageKey> {
        let pos = self.position(ratchet_key, index)?;
        self.entries.remove(pos).map(|entry| entry.key)
    }

    fn position(&self, ratchet_key: &RatchetPublicKey, index: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.ratchet_key == *ratchet_key && entry.key.index() == index)
    }
}

impl PartialEq for SkippedKeyCache {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;

        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(other.entries.iter()).all(|(a, b)| {
                a.ratchet_key == b.ratchet_key
                    && a.key.index() == b.key.index()
                    && bool::from(a.key.key().ct_eq(b.key.key()))
            })
    }
}

impl Eq for SkippedKeyCache {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratchet(byte: u8) -> RatchetPublicKey {
        RatchetPublicKey::from([byte; 32])
    }

    fn key(index: u32) -> MessageKey {
        MessageKey::from_parts([index as u8; 32], index)
    }

    #[test]
    fn insert_and_take() {
        let mut cache = SkippedKeyCache::new();
        cache.insert(ratchet(1), key(4), 10);

        assert!(cache.contains(&ratchet(1), 4));
        assert!(!cache.contains(&ratchet(2), 4));

        let taken = cache.take(&ratchet(1), 4).unwrap();
        assert_eq!(taken.index(), 4);
        assert_eq!(cache.len(), 0);
        assert!(cache.take(&ratchet(1), 4).is_none(), "keys leave the cache once");
    }

    #[test]
    fn full_cache_evicts_oldest_first() {
        let mut cache = SkippedKeyCache::new();
        for i in 0..3 {
            assert_eq!(cache.insert(ratchet(1), key(i), 3), 0);
        }

        let evicted = cache.insert(ratchet(1), key(3), 3);

        assert_eq!(evicted, 1);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&ratchet(1), 0), "oldest entry must be evicted");
        assert!(cache.contains(&ratchet(1), 1));
        assert!(cache.contains(&ratchet(1), 3));
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut cache = SkippedKeyCache::new();
        cache.insert(ratchet(1), key(0), 5);
        cache.insert(ratchet(1), key(0), 5);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn same_index_on_different_chains_is_distinct() {
        let mut cache = SkippedKeyCache::new();
        cache.insert(ratchet(1), key(0), 5);
        cache.insert(ratchet(2), key(0), 5);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ratchet(2), 0).is_some());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = SkippedKeyCache::new();
        assert_eq!(cache.insert(ratchet(1), key(0), 0), 1);
        assert_eq!(cache.len(), 0);
    }
}

//! Key schedule of the double ratchet
//!
//! ```text
//! Agreed shared secret
//!        │
//!        ▼ HKDF
//! Root Key ──► X25519(local secret, remote ratchet key)
//!        │                 │
//!        ▼ HKDF (salted by root key)
//! (next Root Key, Chain Key)
//!        │
//!        ▼ HMAC-SHA256
//! Message Key[index] ──► HKDF ──► XChaCha20-Poly1305 key + nonce
//! ```
//!
//! Message keys derived past an index that has not arrived yet are parked in
//! a bounded skipped-key cache, oldest entry evicted first.

pub mod chain;
pub(crate) mod root;
pub(crate) mod skipped;

pub use chain::{ChainKey, MessageKey};

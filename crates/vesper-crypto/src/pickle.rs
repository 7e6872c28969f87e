//! Encrypted, tamper-evident session snapshots ("pickles").
//!
//! # Layout
//!
//! ```text
//! format_tag:u8 | key_check:[u8;8] | nonce:[u8;24] | XChaCha20-Poly1305(CBOR snapshot)
//! ```
//!
//! The 33-byte header is authenticated as associated data. `key_check` is a
//! short HKDF expansion of the pickle key, so a wrong key is reported as
//! [`PickleError::BadKey`] instead of looking like corruption. The AEAD key is
//! a separate expansion, so `key_check` reveals nothing about it.
//!
//! Snapshot plaintext lives only in zeroizing buffers.

use std::{collections::VecDeque, fmt};

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    config::SessionConfig,
    error::PickleError,
    keys::{KEY_SIZE, PickleKey, RatchetPublicKey, RatchetSecret, RootKey},
    message::TAG_SIZE,
    ratchet::{ChainKey, MessageKey, skipped::SkippedKeyCache},
    session::{LocalRatchet, ReceivingChain, SessionState},
};

/// Pickle format written by this version
pub const FORMAT_TAG: u8 = 0x01;

/// Pickle nonce size (24 bytes, `XChaCha20`)
pub const PICKLE_NONCE_SIZE: usize = 24;

const KEY_CHECK_SIZE: usize = 8;

/// Label for the pickle AEAD key
const CIPHER_LABEL: &[u8] = b"vesperPickleCipherV1";

/// Label for the key check value
const KEY_CHECK_LABEL: &[u8] = b"vesperPickleCheckV1";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct PickleHeader {
    format_tag: u8,
    key_check: [u8; KEY_CHECK_SIZE],
    nonce: [u8; PICKLE_NONCE_SIZE],
}

impl PickleHeader {
    const SIZE: usize = 1 + KEY_CHECK_SIZE + PICKLE_NONCE_SIZE;
}

/// An encrypted session snapshot.
///
/// Opaque outside this module: only [`open_pickle`] with the right key can
/// turn it back into a [`SessionState`].
#[derive(Clone, PartialEq, Eq)]
pub struct Pickle {
    bytes: Vec<u8>,
}

impl Pickle {
    /// Wrap raw pickle bytes. Validation happens when the pickle is opened.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw pickle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse the unpadded standard base64 transport form.
    ///
    /// # Errors
    ///
    /// - `PickleError::Corrupt` if the text is not valid base64
    pub fn from_base64(text: &str) -> Result<Self, PickleError> {
        let bytes = STANDARD_NO_PAD
            .decode(text.trim())
            .map_err(|_| PickleError::Corrupt { reason: "invalid base64" })?;
        Ok(Self { bytes })
    }

    /// Unpadded standard base64 of the pickle bytes.
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(&self.bytes)
    }
}

impl fmt::Debug for Pickle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pickle({} bytes)", self.bytes.len())
    }
}

/// Seal `state` under `key`.
///
/// `nonce` must never repeat under the same key; [`crate::CryptoContext`]
/// draws it from its environment.
pub fn seal_pickle(
    state: &SessionState,
    key: &PickleKey,
    nonce: [u8; PICKLE_NONCE_SIZE],
) -> Pickle {
    seal_snapshot(&SessionSnapshot::capture(state), key, nonce)
}

fn seal_snapshot(
    snapshot: &SessionSnapshot,
    key: &PickleKey,
    nonce: [u8; PICKLE_NONCE_SIZE],
) -> Pickle {
    let mut plaintext = Zeroizing::new(Vec::new());
    let Ok(()) = ciborium::ser::into_writer(snapshot, &mut *plaintext) else {
        unreachable!("CBOR encoding into memory cannot fail");
    };

    let (cipher, key_check) = derive_pickle_keys(key);
    let header = PickleHeader { format_tag: FORMAT_TAG, key_check, nonce };

    let payload = Payload { msg: plaintext.as_slice(), aad: header.as_bytes() };
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut bytes = Vec::with_capacity(PickleHeader::SIZE + ciphertext.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&ciphertext);

    tracing::debug!(
        bytes = bytes.len(),
        skipped_keys = snapshot.skipped_keys.len(),
        "sealed session pickle"
    );
    Pickle { bytes }
}

/// Restore a session from `pickle`.
///
/// Caches larger than `config` allows are trimmed, oldest entries first.
///
/// # Errors
///
/// - `PickleError::Corrupt` if the pickle is empty, truncated, fails
///   authentication or does not decode
/// - `PickleError::UnsupportedFormat` if the format tag is unknown
/// - `PickleError::BadKey` if the pickle was sealed under another key
pub fn open_pickle(
    pickle: &Pickle,
    key: &PickleKey,
    config: &SessionConfig,
) -> Result<SessionState, PickleError> {
    let bytes = pickle.as_bytes();

    match bytes.first() {
        None => return Err(PickleError::Corrupt { reason: "empty pickle" }),
        Some(&tag) if tag != FORMAT_TAG => return Err(PickleError::UnsupportedFormat { tag }),
        Some(_) => {}
    }

    let (header, ciphertext) = PickleHeader::read_from_prefix(bytes)
        .map_err(|_| PickleError::Corrupt { reason: "truncated header" })?;

    let (cipher, key_check) = derive_pickle_keys(key);
    if !bool::from(header.key_check.ct_eq(&key_check)) {
        return Err(PickleError::BadKey);
    }

    if ciphertext.len() < TAG_SIZE {
        return Err(PickleError::Corrupt { reason: "truncated ciphertext" });
    }

    let payload = Payload { msg: ciphertext, aad: header.as_bytes() };
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(XNonce::from_slice(&header.nonce), payload)
            .map_err(|_| PickleError::Corrupt { reason: "authentication failed" })?,
    );

    let snapshot: SessionSnapshot = ciborium::de::from_reader(plaintext.as_slice())
        .map_err(|_| PickleError::Corrupt { reason: "undecodable session state" })?;

    let state = snapshot.restore(config)?;
    tracing::debug!(skipped_keys = state.skipped_key_count(), "opened session pickle");
    Ok(state)
}

fn derive_pickle_keys(key: &PickleKey) -> (XChaCha20Poly1305, [u8; KEY_CHECK_SIZE]) {
    let hkdf = Hkdf::<Sha256>::new(None, key.as_bytes());

    let mut cipher_key = Zeroizing::new([0u8; KEY_SIZE]);
    let Ok(()) = hkdf.expand(CIPHER_LABEL, cipher_key.as_mut_slice()) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let mut key_check = [0u8; KEY_CHECK_SIZE];
    let Ok(()) = hkdf.expand(KEY_CHECK_LABEL, &mut key_check) else {
        unreachable!("8 bytes is a valid HKDF-SHA256 output length");
    };

    let cipher = XChaCha20Poly1305::new_from_slice(cipher_key.as_slice())
        .unwrap_or_else(|_| unreachable!("slice is exactly 32 bytes"));

    (cipher, key_check)
}

/// Serialized form of [`SessionState`]. Every key array is zeroized on drop.
#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    session_id: [u8; KEY_SIZE],
    root_key: [u8; KEY_SIZE],
    local_ratchet_secret: [u8; KEY_SIZE],
    local_ratchet_answered: bool,
    sending_chain: Option<ChainSnapshot>,
    previous_sending_length: u32,
    receiving_chain: Option<ReceivingSnapshot>,
    retired_ratchet_keys: Vec<RatchetPublicKey>,
    skipped_keys: Vec<SkippedKeySnapshot>,
}

#[derive(Serialize, Deserialize)]
struct ChainSnapshot {
    key: [u8; KEY_SIZE],
    index: u32,
}

#[derive(Serialize, Deserialize)]
struct ReceivingSnapshot {
    ratchet_key: RatchetPublicKey,
    chain: ChainSnapshot,
}

#[derive(Serialize, Deserialize)]
struct SkippedKeySnapshot {
    ratchet_key: RatchetPublicKey,
    index: u32,
    key: [u8; KEY_SIZE],
}

impl SessionSnapshot {
    fn capture(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id,
            root_key: *state.root_key.as_bytes(),
            local_ratchet_secret: state.local_ratchet.secret.to_bytes(),
            local_ratchet_answered: state.local_ratchet.answered,
            sending_chain: state.sending_chain.as_ref().map(ChainSnapshot::capture),
            previous_sending_length: state.previous_sending_length,
            receiving_chain: state.receiving_chain.as_ref().map(|receiving| ReceivingSnapshot {
                ratchet_key: receiving.ratchet_key,
                chain: ChainSnapshot::capture(&receiving.chain),
            }),
            retired_ratchet_keys: state.retired_ratchet_keys.iter().copied().collect(),
            skipped_keys: state
                .skipped_keys
                .iter()
                .map(|skipped| SkippedKeySnapshot {
                    ratchet_key: skipped.ratchet_key,
                    index: skipped.key.index(),
                    key: *skipped.key.key(),
                })
                .collect(),
        }
    }

    /// Rejects snapshots no session could have produced. Caches larger than
    /// `config` allows are trimmed oldest first.
    fn restore(&self, config: &SessionConfig) -> Result<SessionState, PickleError> {
        self.validate()?;

        let retired_skip =
            self.retired_ratchet_keys.len().saturating_sub(config.max_retired_chains);
        let retired_ratchet_keys: VecDeque<_> =
            self.retired_ratchet_keys.iter().skip(retired_skip).copied().collect();

        let mut skipped_keys = SkippedKeyCache::new();
        for skipped in &self.skipped_keys {
            skipped_keys.insert(
                skipped.ratchet_key,
                MessageKey::from_parts(skipped.key, skipped.index),
                config.max_skipped_keys,
            );
        }

        Ok(SessionState {
            session_id: self.session_id,
            root_key: RootKey::new(self.root_key),
            local_ratchet: LocalRatchet {
                secret: RatchetSecret::from_bytes(self.local_ratchet_secret),
                answered: self.local_ratchet_answered,
            },
            sending_chain: self.sending_chain.as_ref().map(ChainSnapshot::restore),
            previous_sending_length: self.previous_sending_length,
            receiving_chain: self.receiving_chain.as_ref().map(|receiving| ReceivingChain {
                ratchet_key: receiving.ratchet_key,
                chain: receiving.chain.restore(),
            }),
            retired_ratchet_keys,
            skipped_keys,
        })
    }

    fn validate(&self) -> Result<(), PickleError> {
        let current = self.receiving_chain.as_ref();

        for (i, retired) in self.retired_ratchet_keys.iter().enumerate() {
            if self.retired_ratchet_keys[..i].contains(retired) {
                return Err(PickleError::Corrupt { reason: "duplicate retired ratchet key" });
            }
            if current.is_some_and(|receiving| receiving.ratchet_key == *retired) {
                return Err(PickleError::Corrupt { reason: "current ratchet key is retired" });
            }
        }

        for (i, skipped) in self.skipped_keys.iter().enumerate() {
            let duplicate = self.skipped_keys[..i].iter().any(|earlier| {
                earlier.ratchet_key == skipped.ratchet_key && earlier.index == skipped.index
            });
            if duplicate {
                return Err(PickleError::Corrupt { reason: "duplicate skipped key" });
            }

            let ahead_of_chain = current.is_some_and(|receiving| {
                receiving.ratchet_key == skipped.ratchet_key
                    && skipped.index >= receiving.chain.index
            });
            if ahead_of_chain {
                return Err(PickleError::Corrupt { reason: "skipped key ahead of its chain" });
            }
        }

        Ok(())
    }
}

impl ChainSnapshot {
    fn capture(chain: &ChainKey) -> Self {
        Self { key: *chain.key_bytes(), index: chain.index() }
    }

    fn restore(&self) -> ChainKey {
        ChainKey::from_parts(self.key, self.index)
    }
}

impl Drop for SessionSnapshot {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.local_ratchet_secret.zeroize();
    }
}

impl Drop for ChainSnapshot {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl Drop for SkippedKeySnapshot {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

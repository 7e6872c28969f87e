//! Vesper Session Cryptography
//!
//! Double-ratchet sessions that can be sealed into encrypted "pickles",
//! restored with a caller-held 256-bit key, and used to decrypt a single
//! inbound message. Built for hosts that keep the session at rest and only
//! wake up briefly to decrypt, such as a notification extension.
//!
//! # Flow
//!
//! ```text
//! Pickle (base64) + PickleKey
//!        │
//!        ▼ unpickle: key check, XChaCha20-Poly1305 open, CBOR decode
//! SessionState
//!        │
//!        ▼ decrypt: DH step / chain advance / skipped-key lookup
//! Message Key ──► XChaCha20-Poly1305 open (header as associated data)
//!        │
//!        ▼
//! Plaintext (+ advanced SessionState, re-pickled at the host's discretion)
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys are zeroized as soon as the next one is derived
//! - Message keys are used once; skipped keys are erased when consumed
//! - Every reply rotates the local ratchet key, so a leaked chain key stops
//!   exposing messages after the next DH step
//!
//! Tamper Evidence:
//! - Pickles and messages are AEAD-protected including their headers
//! - A wrong pickle key is detected before decryption is attempted
//!
//! Atomicity:
//! - Failed decryption leaves the session exactly as it was
//!
//! # Determinism
//!
//! All randomness flows through [`Environment`]. [`CryptoContext`] carries the
//! environment and [`SessionConfig`]; there is no global state.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod keys;
pub mod message;
pub mod pickle;
pub mod ratchet;
pub mod session;

pub use config::SessionConfig;
pub use context::CryptoContext;
pub use env::{Environment, SystemEnv};
pub use error::{Error, PickleError, SessionError};
pub use keys::{KEY_SIZE, PickleKey, RatchetPublicKey, RatchetSecret};
pub use message::{Message, MessageHeader, TAG_SIZE};
pub use pickle::{FORMAT_TAG, PICKLE_NONCE_SIZE, Pickle, open_pickle, seal_pickle};
pub use session::SessionState;

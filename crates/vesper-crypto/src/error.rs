//! Error types for pickling and session operations
//!
//! None of these errors carry key material, chain state or plaintext. Their
//! `Display` output is safe to hand to a host application verbatim.

use thiserror::Error;

/// Errors from restoring or sealing a pickled session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickleError {
    /// Pickle key was not exactly 32 bytes
    #[error("invalid pickle key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required key length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Pickle was sealed under a different key
    #[error("pickle key does not match this pickle")]
    BadKey,

    /// Pickle is truncated, tampered with or otherwise undecodable
    #[error("pickle is corrupt: {reason}")]
    Corrupt {
        /// Which check rejected the pickle
        reason: &'static str,
    },

    /// Leading format tag names a layout this build cannot read
    #[error("unsupported pickle format tag {tag:#04x}")]
    UnsupportedFormat {
        /// The tag found at the start of the pickle
        tag: u8,
    },
}

impl PickleError {
    /// Returns true if a different pickle key might open the same pickle.
    pub fn is_key_problem(&self) -> bool {
        matches!(self, Self::InvalidKeyLength { .. } | Self::BadKey)
    }
}

/// Errors from decrypting or encrypting with a session.
///
/// Every variant is recoverable: the session is left exactly as it was before
/// the failing call, so the caller may retry with another message or fetch a
/// fresher session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Ciphertext could not be parsed into header and body
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext {
        /// Which check rejected the ciphertext
        reason: &'static str,
    },

    /// Message uses a ratchet key this session cannot derive a chain for
    #[error("unknown ratchet key")]
    UnknownRatchetKey,

    /// Ratchet key is a low-order point and yields no shared secret
    #[error("invalid ratchet key")]
    InvalidRatchetKey,

    /// Message key was already consumed, evicted or never derived
    #[error("message {index} was already decrypted or its key is unknown")]
    ReplayOrUnknownMessage {
        /// Chain index carried by the message
        index: u32,
    },

    /// Authentication tag did not verify under the derived message key
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Reaching the message would skip more keys than allowed
    #[error("message gap too large: chain at {current}, message at {requested}")]
    MessageGapTooLarge {
        /// Current chain position
        current: u32,
        /// Index carried by the message
        requested: u32,
    },

    /// Chain index would overflow
    #[error("chain index overflow at {current}")]
    CounterOverflow {
        /// Chain index when the overflow was detected
        current: u32,
    },

    /// Inbound session has not received a message yet and cannot send
    #[error("session has no remote ratchet key yet")]
    NotEstablished,
}

impl SessionError {
    /// Returns true if the same message may decrypt with a fresher session.
    ///
    /// A host that decrypts from a stale snapshot sees these when the sender
    /// has moved on. A gap that is too large shrinks when the fresher snapshot
    /// has consumed more of the same receiving chain, since the gap is measured
    /// from that chain's counter. Replays, tampering and malformed input never
    /// become decryptable by refreshing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UnknownRatchetKey | Self::MessageGapTooLarge { .. } | Self::NotEstablished
        )
    }
}

/// Any failure of the unpickle-then-decrypt flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Restoring the session failed
    #[error(transparent)]
    Pickle(#[from] PickleError),

    /// Decrypting with the restored session failed
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ratchet_key_is_transient() {
        assert!(SessionError::UnknownRatchetKey.is_transient());
    }

    #[test]
    fn replay_is_not_transient() {
        assert!(!SessionError::ReplayOrUnknownMessage { index: 3 }.is_transient());
        assert!(!SessionError::AuthenticationFailed.is_transient());
    }

    #[test]
    fn bad_key_is_key_problem() {
        assert!(PickleError::BadKey.is_key_problem());
        assert!(!PickleError::Corrupt { reason: "tag mismatch" }.is_key_problem());
    }

    #[test]
    fn error_display() {
        let err = SessionError::MessageGapTooLarge { current: 10, requested: 5000 };
        assert_eq!(err.to_string(), "message gap too large: chain at 10, message at 5000");

        let err = PickleError::UnsupportedFormat { tag: 0x7f };
        assert_eq!(err.to_string(), "unsupported pickle format tag 0x7f");
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let err = Error::from(SessionError::AuthenticationFailed);
        assert_eq!(err.to_string(), "message authentication failed");
    }
}

//! Boundary error type
//!
//! `Display` output is what the host receives in an error buffer. Messages
//! are prefixed by stage and never carry key bytes or plaintext.

use thiserror::Error;
use vesper_crypto::{PickleError, SessionError};

/// Errors surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A required input was empty
    #[error("Invalid input: {field} is empty")]
    EmptyInput {
        /// Name of the offending argument
        field: &'static str,
    },

    /// Pickle key was not 32 bytes
    #[error("Invalid input: {0}")]
    InvalidKey(PickleError),

    /// Restoring the session or decrypting the message failed
    #[error("Decryption failed: {0}")]
    Decrypt(vesper_crypto::Error),

    /// Encrypting with the restored session failed
    #[error("Encryption failed: {0}")]
    Encrypt(vesper_crypto::Error),

    /// Decrypted bytes are not UTF-8 text
    #[error("Decryption failed: plaintext is not valid UTF-8")]
    NonUtf8Plaintext,

    /// Output does not fit a length-prefixed buffer
    #[error("Decryption failed: plaintext exceeds buffer limit")]
    OutputTooLarge,
}

impl BridgeError {
    /// Returns true if retrying with a fresher pickled session may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Decrypt(vesper_crypto::Error::Session(err))
            | Self::Encrypt(vesper_crypto::Error::Session(err)) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<SessionError> for BridgeError {
    fn from(err: SessionError) -> Self {
        Self::Decrypt(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_stage_prefix() {
        let err = BridgeError::EmptyInput { field: "ciphertext" };
        assert_eq!(err.to_string(), "Invalid input: ciphertext is empty");

        let err = BridgeError::from(SessionError::AuthenticationFailed);
        assert_eq!(err.to_string(), "Decryption failed: message authentication failed");

        let err =
            BridgeError::InvalidKey(PickleError::InvalidKeyLength { expected: 32, actual: 3 });
        assert_eq!(err.to_string(), "Invalid input: invalid pickle key length: expected 32, got 3");
    }

    #[test]
    fn transient_follows_session_error() {
        assert!(BridgeError::from(SessionError::UnknownRatchetKey).is_transient());
        assert!(!BridgeError::from(SessionError::AuthenticationFailed).is_transient());
        assert!(!BridgeError::NonUtf8Plaintext.is_transient());
    }
}

//! Explicit crypto context
//!
//! Holds the entropy source and session limits that every operation needs.
//! Hosts construct one and pass it around; nothing is initialised globally.

use crate::{
    config::SessionConfig,
    env::{Environment, SystemEnv},
    error::{Error, PickleError, SessionError},
    keys::{KEY_SIZE, PickleKey, RatchetPublicKey, RatchetSecret},
    message::Message,
    pickle::{self, Pickle},
    session::SessionState,
};

/// Entropy source plus session limits.
///
/// Generic over [`Environment`] so tests can make ratchet keys and pickle
/// nonces reproducible.
#[derive(Debug, Clone)]
pub struct CryptoContext<E: Environment = SystemEnv> {
    env: E,
    config: SessionConfig,
}

impl CryptoContext<SystemEnv> {
    /// Context backed by the OS RNG with default limits.
    pub fn system() -> Self {
        Self::new(SystemEnv::new(), SessionConfig::default())
    }
}

impl Default for CryptoContext<SystemEnv> {
    fn default() -> Self {
        Self::system()
    }
}

impl<E: Environment> CryptoContext<E> {
    /// Create a context from an environment and limits.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self { env, config }
    }

    /// Session limits applied by this context.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Entropy source used by this context.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Generate a fresh ratchet key, e.g. the initial key an inbound side
    /// publishes.
    pub fn generate_ratchet_secret(&self) -> RatchetSecret {
        RatchetSecret::from_bytes(self.env.random_array())
    }

    /// Bootstrap the sending side of a session from an agreed secret.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidRatchetKey` if `remote_ratchet_key` is
    ///   low-order
    pub fn create_outbound_session(
        &self,
        shared_secret: &[u8; KEY_SIZE],
        remote_ratchet_key: RatchetPublicKey,
    ) -> Result<SessionState, SessionError> {
        let local_ratchet_secret = self.generate_ratchet_secret();
        SessionState::new_outbound(shared_secret, remote_ratchet_key, local_ratchet_secret)
    }

    /// Bootstrap the receiving side of a session from an agreed secret.
    pub fn create_inbound_session(
        &self,
        shared_secret: &[u8; KEY_SIZE],
        local_ratchet_secret: RatchetSecret,
    ) -> SessionState {
        SessionState::new_inbound(shared_secret, local_ratchet_secret)
    }

    /// Seal `state` under `key` with a fresh nonce.
    pub fn pickle(&self, state: &SessionState, key: &PickleKey) -> Pickle {
        pickle::seal_pickle(state, key, self.env.random_array())
    }

    /// Restore a session from `pickle`.
    ///
    /// # Errors
    ///
    /// See [`pickle::open_pickle`].
    pub fn unpickle(&self, pickle: &Pickle, key: &PickleKey) -> Result<SessionState, PickleError> {
        pickle::open_pickle(pickle, key, &self.config)
    }

    /// Decrypt one message, advancing `state`.
    ///
    /// # Errors
    ///
    /// See [`SessionState::decrypt`]. `state` is unchanged on error.
    pub fn decrypt(
        &self,
        state: &mut SessionState,
        message: &Message,
    ) -> Result<Vec<u8>, SessionError> {
        state.decrypt(message, &self.config)
    }

    /// Encrypt one message, rotating the local ratchet key if needed.
    ///
    /// # Errors
    ///
    /// See [`SessionState::encrypt`].
    pub fn encrypt(
        &self,
        state: &mut SessionState,
        plaintext: &[u8],
    ) -> Result<Message, SessionError> {
        state.encrypt(plaintext, &self.env)
    }

    /// Unpickle, decrypt a single message and return the advanced session.
    ///
    /// The caller decides whether to re-pickle the returned state or discard
    /// it.
    ///
    /// # Errors
    ///
    /// - `Error::Pickle` if the session cannot be restored
    /// - `Error::Session` if the message does not decrypt
    pub fn decrypt_pickled(
        &self,
        pickle: &Pickle,
        key: &PickleKey,
        message: &Message,
    ) -> Result<(Vec<u8>, SessionState), Error> {
        let mut state = self.unpickle(pickle, key)?;
        let plaintext = self.decrypt(&mut state, message)?;
        Ok((plaintext, state))
    }
}

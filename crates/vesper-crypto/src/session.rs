//! Double-ratchet session state and message processing.
//!
//! A [`SessionState`] is mutated in place by [`SessionState::decrypt`] and
//! [`SessionState::encrypt`]. Both work on scratch copies of the chains they
//! touch and write the result back only after the AEAD tag has verified, so a
//! failed call leaves the session bit-for-bit unchanged.
//!
//! # Decryption paths
//!
//! ```text
//! header.ratchet_key == receiving chain key  ──► chain advance or skipped lookup
//! header.ratchet_key in retired keys         ──► skipped lookup only
//! otherwise                                  ──► DH step (once per local key)
//! ```

use std::{collections::VecDeque, fmt};

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};

use crate::{
    cipher,
    config::SessionConfig,
    env::Environment,
    error::SessionError,
    keys::{KEY_SIZE, RatchetPublicKey, RatchetSecret, RootKey},
    message::{Message, MessageHeader},
    ratchet::{ChainKey, MessageKey, root, skipped::SkippedKeyCache},
};

/// Our current ratchet key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalRatchet {
    pub(crate) secret: RatchetSecret,
    /// A receiving chain has already been derived against this key. A second
    /// unknown remote key cannot be answered until we rotate.
    pub(crate) answered: bool,
}

/// The chain the remote side is currently sending on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReceivingChain {
    pub(crate) ratchet_key: RatchetPublicKey,
    pub(crate) chain: ChainKey,
}

/// Fresh local ratchet key and the root key it leads to, not yet committed.
struct Rotation {
    secret: RatchetSecret,
    root_key: RootKey,
}

/// State of one double-ratchet session.
///
/// # Invariants
///
/// - A message key is used at most once: keys behind a chain's counter exist
///   only in the skipped-key cache and leave it when consumed
/// - The skipped-key cache never exceeds [`SessionConfig::max_skipped_keys`]
/// - `sending_chain` is `None` exactly when a DH step has happened since our
///   last send (or we never sent)
#[derive(PartialEq, Eq)]
pub struct SessionState {
    pub(crate) session_id: [u8; KEY_SIZE],
    pub(crate) root_key: RootKey,
    pub(crate) local_ratchet: LocalRatchet,
    pub(crate) sending_chain: Option<ChainKey>,
    pub(crate) previous_sending_length: u32,
    pub(crate) receiving_chain: Option<ReceivingChain>,
    pub(crate) retired_ratchet_keys: VecDeque<RatchetPublicKey>,
    pub(crate) skipped_keys: SkippedKeyCache,
}

impl SessionState {
    /// Start a session as the side that sends first.
    ///
    /// `remote_ratchet_key` is the peer's initial ratchet public key and
    /// `local_ratchet_secret` our first ratchet key. The sending chain is
    /// active immediately.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidRatchetKey` if `remote_ratchet_key` is a
    ///   low-order point
    pub fn new_outbound(
        shared_secret: &[u8; KEY_SIZE],
        remote_ratchet_key: RatchetPublicKey,
        local_ratchet_secret: RatchetSecret,
    ) -> Result<Self, SessionError> {
        let initial = root::initial_root_key(shared_secret);
        let shared = local_ratchet_secret
            .diffie_hellman(&remote_ratchet_key)
            .ok_or(SessionError::InvalidRatchetKey)?;
        let (root_key, sending_chain) = root::advance_root(&initial, &shared);

        Ok(Self {
            session_id: root::session_id(shared_secret),
            root_key,
            local_ratchet: LocalRatchet { secret: local_ratchet_secret, answered: false },
            sending_chain: Some(sending_chain),
            previous_sending_length: 0,
            receiving_chain: None,
            retired_ratchet_keys: VecDeque::new(),
            skipped_keys: SkippedKeyCache::new(),
        })
    }

    /// Start a session as the side that receives first.
    ///
    /// `local_ratchet_secret` must be the key whose public half the peer
    /// passed to [`SessionState::new_outbound`]. No chain exists until the
    /// first message arrives.
    pub fn new_inbound(
        shared_secret: &[u8; KEY_SIZE],
        local_ratchet_secret: RatchetSecret,
    ) -> Self {
        Self {
            session_id: root::session_id(shared_secret),
            root_key: root::initial_root_key(shared_secret),
            local_ratchet: LocalRatchet { secret: local_ratchet_secret, answered: false },
            sending_chain: None,
            previous_sending_length: 0,
            receiving_chain: None,
            retired_ratchet_keys: VecDeque::new(),
            skipped_keys: SkippedKeyCache::new(),
        }
    }

    /// Decrypt one message, advancing the ratchet.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnknownRatchetKey` if the message starts a chain this
    ///   session cannot derive
    /// - `SessionError::InvalidRatchetKey` if the ratchet key is low-order
    /// - `SessionError::ReplayOrUnknownMessage` if the message key was already
    ///   consumed or evicted
    /// - `SessionError::MessageGapTooLarge` if reaching the message would skip
    ///   more than `config.max_skip` keys
    /// - `SessionError::AuthenticationFailed` if the tag does not verify
    ///
    /// On error the session is unchanged.
    pub fn decrypt(
        &mut self,
        message: &Message,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let header = message.header();
        let (ratchet_key, index) = (header.ratchet_key(), header.index());

        let on_current_chain =
            self.receiving_chain.as_ref().is_some_and(|chain| chain.ratchet_key == ratchet_key);

        // Cached keys outlive the retired-key list, so they are checked on
        // their own before a DH step is considered
        if on_current_chain {
            self.decrypt_on_current_chain(message, config)
        } else if self.skipped_keys.contains(&ratchet_key, index)
            || self.retired_ratchet_keys.contains(&ratchet_key)
        {
            self.decrypt_with_skipped_key(message)
        } else {
            self.decrypt_with_new_chain(message, config)
        }
    }

    /// Encrypt `plaintext` on the sending chain.
    ///
    /// If a DH step happened since our last send, a new local ratchet key is
    /// drawn from `env` and a fresh sending chain derived first.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotEstablished` if no remote ratchet key is known yet
    /// - `SessionError::CounterOverflow` if the sending chain is exhausted
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        env: &impl Environment,
    ) -> Result<Message, SessionError> {
        let (mut sending, rotation) = match &self.sending_chain {
            Some(chain) => (chain.clone(), None),
            None => {
                let (rotation, chain) = self.prepare_rotation(env)?;
                (chain, Some(rotation))
            }
        };

        let message_key = sending.advance()?;

        if let Some(rotation) = rotation {
            self.root_key = rotation.root_key;
            self.local_ratchet = LocalRatchet { secret: rotation.secret, answered: false };
        }
        self.sending_chain = Some(sending);

        let header = MessageHeader::new(
            self.local_ratchet.secret.public_key(),
            self.previous_sending_length,
            message_key.index(),
        );

        Ok(cipher::seal(&message_key, header, plaintext))
    }

    /// Identifier shared by both sides of the session, unpadded base64.
    pub fn session_id(&self) -> String {
        STANDARD_NO_PAD.encode(self.session_id)
    }

    /// Whether any message has been decrypted on this session.
    pub fn has_received_message(&self) -> bool {
        self.receiving_chain.is_some()
    }

    /// Index of the next message we will send, if a sending chain is active.
    pub fn sending_index(&self) -> Option<u32> {
        self.sending_chain.as_ref().map(ChainKey::index)
    }

    /// Index of the next message expected on the receiving chain.
    pub fn receiving_index(&self) -> Option<u32> {
        self.receiving_chain.as_ref().map(|receiving| receiving.chain.index())
    }

    /// Number of message keys waiting in the skipped-key cache.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Our current ratchet public key.
    pub fn local_ratchet_key(&self) -> RatchetPublicKey {
        self.local_ratchet.secret.public_key()
    }

    /// The remote ratchet key of the current receiving chain.
    pub fn remote_ratchet_key(&self) -> Option<RatchetPublicKey> {
        self.receiving_chain.as_ref().map(|receiving| receiving.ratchet_key)
    }

    fn decrypt_on_current_chain(
        &mut self,
        message: &Message,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let header = message.header();
        let (ratchet_key, index) = (header.ratchet_key(), header.index());

        let Some(receiving) = self.receiving_chain.as_mut() else {
            return Err(SessionError::UnknownRatchetKey);
        };

        if index < receiving.chain.index() {
            return self.decrypt_with_skipped_key(message);
        }

        let mut chain = receiving.chain.clone();
        let (skipped, message_key) = chain.advance_to(index, config.max_skip)?;
        let plaintext = cipher::open(&message_key, message)?;

        receiving.chain = chain;
        self.cache_skipped_keys(ratchet_key, skipped, config);

        tracing::trace!(index, "decrypted message on receiving chain");
        Ok(plaintext)
    }

    fn decrypt_with_skipped_key(&mut self, message: &Message) -> Result<Vec<u8>, SessionError> {
        let header = message.header();
        let (ratchet_key, index) = (header.ratchet_key(), header.index());

        let Some(message_key) = self.skipped_keys.get(&ratchet_key, index) else {
            return Err(SessionError::ReplayOrUnknownMessage { index });
        };
        let plaintext = cipher::open(message_key, message)?;

        // Dropping the taken key zeroizes it
        drop(self.skipped_keys.take(&ratchet_key, index));

        tracing::debug!(index, remaining = self.skipped_keys.len(), "used skipped message key");
        Ok(plaintext)
    }

    fn decrypt_with_new_chain(
        &mut self,
        message: &Message,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let header = message.header();
        let ratchet_key = header.ratchet_key();
        let index = header.index();
        let previous_chain_length = header.previous_chain_length();

        if self.local_ratchet.answered {
            return Err(SessionError::UnknownRatchetKey);
        }

        let shared = self
            .local_ratchet
            .secret
            .diffie_hellman(&ratchet_key)
            .ok_or(SessionError::InvalidRatchetKey)?;
        let (root_key, mut chain) = root::advance_root(&self.root_key, &shared);

        // Keys the sender used on the chain being replaced that have not
        // arrived yet
        let previous_tail = match &self.receiving_chain {
            Some(previous) => {
                let mut tail_chain = previous.chain.clone();
                let tail = tail_chain.skip_until(previous_chain_length, config.max_skip)?;
                Some((previous.ratchet_key, tail))
            }
            None => None,
        };

        let (skipped, message_key) = chain.advance_to(index, config.max_skip)?;
        let plaintext = cipher::open(&message_key, message)?;

        if let Some((previous_key, tail)) = previous_tail {
            self.cache_skipped_keys(previous_key, tail, config);
            self.retire_ratchet_key(previous_key, config);
        }
        self.cache_skipped_keys(ratchet_key, skipped, config);

        if let Some(sending) = self.sending_chain.take() {
            self.previous_sending_length = sending.index();
        }
        self.root_key = root_key;
        self.receiving_chain = Some(ReceivingChain { ratchet_key, chain });
        self.local_ratchet.answered = true;

        tracing::debug!(
            index,
            previous_chain_length,
            retired = self.retired_ratchet_keys.len(),
            "DH ratchet step to new receiving chain"
        );
        Ok(plaintext)
    }

    fn prepare_rotation(
        &self,
        env: &impl Environment,
    ) -> Result<(Rotation, ChainKey), SessionError> {
        let Some(receiving) = &self.receiving_chain else {
            return Err(SessionError::NotEstablished);
        };

        let secret = RatchetSecret::from_bytes(env.random_array());
        let shared =
            secret.diffie_hellman(&receiving.ratchet_key).ok_or(SessionError::InvalidRatchetKey)?;
        let (root_key, chain) = root::advance_root(&self.root_key, &shared);

        tracing::debug!("rotated local ratchet key");
        Ok((Rotation { secret, root_key }, chain))
    }

    fn cache_skipped_keys(
        &mut self,
        ratchet_key: RatchetPublicKey,
        keys: Vec<MessageKey>,
        config: &SessionConfig,
    ) {
        let evicted: usize = keys
            .into_iter()
            .map(|key| self.skipped_keys.insert(ratchet_key, key, config.max_skipped_keys))
            .sum();

        if evicted > 0 {
            tracing::debug!(
                evicted,
                capacity = config.max_skipped_keys,
                "skipped-key cache full, evicted oldest keys"
            );
        }
    }

    fn retire_ratchet_key(&mut self, ratchet_key: RatchetPublicKey, config: &SessionConfig) {
        self.retired_ratchet_keys.push_back(ratchet_key);
        while self.retired_ratchet_keys.len() > config.max_retired_chains {
            self.retired_ratchet_keys.pop_front();
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_id", &self.session_id())
            .field("local_ratchet_key", &self.local_ratchet_key())
            .field("remote_ratchet_key", &self.remote_ratchet_key())
            .field("sending_index", &self.sending_index())
            .field("receiving_index", &self.receiving_index())
            .field("skipped_keys", &self.skipped_keys.len())
            .finish_non_exhaustive()
    }
}

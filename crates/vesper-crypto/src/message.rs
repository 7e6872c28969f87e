//! Ratchet message wire format.
//!
//! A message is a fixed 41-byte header (big endian) followed by the AEAD
//! output. The header travels in the clear and is authenticated as associated
//! data, so any change to it fails decryption.
//!
//! ```text
//! version:u8 | ratchet_key:[u8;32] | previous_chain_length:u32 | index:u32 | body
//! ```
//!
//! Hosts exchange messages as unpadded standard base64.

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{error::SessionError, keys::RatchetPublicKey};

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Fixed 41-byte message header.
///
/// Fields are raw byte arrays so every bit pattern is a valid header and the
/// struct has no padding. Validation beyond size happens in
/// [`Message::decode`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    version: u8,
    ratchet_key: [u8; 32],
    previous_chain_length: [u8; 4],
    index: [u8; 4],
}

impl MessageHeader {
    /// Size of the serialized header (41 bytes)
    pub const SIZE: usize = 41;

    /// Current message format version
    pub const VERSION: u8 = 0x01;

    /// Build a header for the message at `index` on the chain of
    /// `ratchet_key`.
    #[must_use]
    pub fn new(ratchet_key: RatchetPublicKey, previous_chain_length: u32, index: u32) -> Self {
        Self {
            version: Self::VERSION,
            ratchet_key: *ratchet_key.as_bytes(),
            previous_chain_length: previous_chain_length.to_be_bytes(),
            index: index.to_be_bytes(),
        }
    }

    /// Format version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Sender's ratchet public key.
    #[must_use]
    pub fn ratchet_key(&self) -> RatchetPublicKey {
        RatchetPublicKey::from(self.ratchet_key)
    }

    /// Number of messages the sender sent on its previous chain.
    #[must_use]
    pub fn previous_chain_length(&self) -> u32 {
        u32::from_be_bytes(self.previous_chain_length)
    }

    /// Position of this message on the sender's chain.
    #[must_use]
    pub fn index(&self) -> u32 {
        u32::from_be_bytes(self.index)
    }

    /// Serialized header, used as AEAD associated data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }
}

/// A complete ratchet message: header plus encrypted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    body: Vec<u8>,
}

impl Message {
    pub(crate) fn new(header: MessageHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    /// Message header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Ciphertext followed by the 16-byte authentication tag.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parse a message from raw bytes.
    ///
    /// # Errors
    ///
    /// - `SessionError::MalformedCiphertext` if the input is shorter than a
    ///   header, carries an unknown version, or its body cannot hold a tag
    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        let (header, body) = MessageHeader::read_from_prefix(bytes)
            .map_err(|_| SessionError::MalformedCiphertext { reason: "truncated header" })?;

        if header.version != MessageHeader::VERSION {
            return Err(SessionError::MalformedCiphertext { reason: "unsupported message version" });
        }

        if body.len() < TAG_SIZE {
            return Err(SessionError::MalformedCiphertext {
                reason: "body shorter than authentication tag",
            });
        }

        Ok(Self { header, body: body.to_vec() })
    }

    /// Serialize to raw bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MessageHeader::SIZE + self.body.len());
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a message from its base64 transport form.
    ///
    /// # Errors
    ///
    /// - `SessionError::MalformedCiphertext` if the text is not base64 or the
    ///   decoded bytes fail [`Message::decode`]
    pub fn from_base64(text: &str) -> Result<Self, SessionError> {
        let bytes = STANDARD_NO_PAD
            .decode(text.trim())
            .map_err(|_| SessionError::MalformedCiphertext { reason: "invalid base64" })?;
        Self::decode(&bytes)
    }

    /// Unpadded standard base64 of [`Message::encode`].
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.encode())
    }
}

//! Root key schedule using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

use super::chain::ChainKey;
use crate::keys::{KEY_SIZE, RootKey};

/// Label for turning an agreed shared secret into the first root key
const INITIAL_ROOT_LABEL: &[u8] = b"vesperRootInitV1";

/// Label for a DH ratchet step
const RATCHET_LABEL: &[u8] = b"vesperRatchetV1";

/// Label for the public session identifier
const SESSION_ID_LABEL: &[u8] = b"vesperSessionIdV1";

/// Derive the first root key of a session from an agreed shared secret.
///
/// Both sides of a session call this with the same secret. The secret itself
/// never becomes a root key, so a leaked root key does not expose it.
pub(crate) fn initial_root_key(shared_secret: &[u8; KEY_SIZE]) -> RootKey {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);

    let mut root = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(INITIAL_ROOT_LABEL, &mut root) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = RootKey::new(root);
    root.zeroize();
    key
}

/// Identifier both sides derive from the agreed secret.
///
/// Stable for the lifetime of the session and safe to publish: it is a
/// one-way expansion under its own label.
pub(crate) fn session_id(shared_secret: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);

    let mut id = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(SESSION_ID_LABEL, &mut id) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    id
}

/// Perform one DH ratchet step of the root chain.
///
/// The current root key salts an HKDF over the X25519 output; the 64-byte
/// expansion becomes the next root key and a fresh chain key.
///
/// # Security
///
/// - The old root key is not recoverable from the outputs
/// - Both parties derive the same chain only if they agree on the DH output
/// - Deterministic: same inputs always produce same outputs
pub(crate) fn advance_root(
    root_key: &RootKey,
    shared_secret: &SharedSecret,
) -> (RootKey, ChainKey) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), shared_secret.as_bytes());

    let mut output = [0u8; 2 * KEY_SIZE];
    let Ok(()) = hkdf.expand(RATCHET_LABEL, &mut output) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut root = [0u8; KEY_SIZE];
    let mut chain = [0u8; KEY_SIZE];
    root.copy_from_slice(&output[..KEY_SIZE]);
    chain.copy_from_slice(&output[KEY_SIZE..]);
    output.zeroize();

    let result = (RootKey::new(root), ChainKey::new(chain));
    root.zeroize();
    chain.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RatchetSecret;

    fn shared(a: u8, b: u8) -> SharedSecret {
        let ours = RatchetSecret::from_bytes([a; 32]);
        let theirs = RatchetSecret::from_bytes([b; 32]);
        ours.diffie_hellman(&theirs.public_key()).unwrap()
    }

    #[test]
    fn initial_root_key_is_deterministic() {
        let a = initial_root_key(&[9u8; 32]);
        let b = initial_root_key(&[9u8; 32]);
        assert_eq!(a, b, "same secret must produce same root key");
    }

    #[test]
    fn initial_root_key_differs_from_secret() {
        let root = initial_root_key(&[9u8; 32]);
        assert_ne!(root.as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn session_id_is_independent_of_root_key() {
        let secret = [9u8; 32];
        assert_eq!(session_id(&secret), session_id(&secret));
        assert_ne!(&session_id(&secret), initial_root_key(&secret).as_bytes());
    }

    #[test]
    fn both_sides_derive_same_chain() {
        let root = initial_root_key(&[1u8; 32]);

        let (root_a, mut chain_a) = advance_root(&root, &shared(1, 2));
        let (root_b, mut chain_b) = advance_root(&root, &shared(2, 1));

        assert_eq!(root_a, root_b);
        assert_eq!(chain_a.advance().unwrap().key(), chain_b.advance().unwrap().key());
    }

    #[test]
    fn different_dh_outputs_produce_different_roots() {
        let root = initial_root_key(&[1u8; 32]);

        let (root_a, _) = advance_root(&root, &shared(1, 2));
        let (root_b, _) = advance_root(&root, &shared(1, 3));

        assert_ne!(root_a, root_b);
    }

    #[test]
    fn root_step_changes_root_key() {
        let root = initial_root_key(&[1u8; 32]);
        let (next, chain) = advance_root(&root, &shared(4, 5));

        assert_ne!(root, next);
        assert_eq!(chain.index(), 0);
        assert_ne!(next.as_bytes(), chain.key_bytes());
    }
}

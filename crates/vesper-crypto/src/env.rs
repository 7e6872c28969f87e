//! Entropy abstraction for deterministic testing.
//!
//! Decouples session logic from the system RNG. Production code uses
//! [`SystemEnv`]; tests plug in a seeded or constant source so pickles and
//! ratchet keys are reproducible.

/// Source of randomness for ratchet key generation and pickle nonces.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - The method is infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same seed, a test implementation produces the same sequence
    /// - Uses a cryptographically secure RNG in production
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `N`-byte array.
    ///
    /// Convenience for ratchet secrets and nonces.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Production environment backed by the OS cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A session engine without working entropy
/// cannot generate ratchet keys or pickle nonces safely, and continuing would
/// risk nonce reuse under the pickle key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot generate key material");
    }
}

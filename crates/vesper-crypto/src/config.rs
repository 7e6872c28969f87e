//! Session limits

/// Bounds applied while advancing ratchets and restoring pickles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of skipped message keys kept for late messages.
    ///
    /// When full, the oldest entry is evicted first.
    pub max_skipped_keys: usize,

    /// Maximum number of positions a single chain may be advanced to reach
    /// one message.
    pub max_skip: u32,

    /// Maximum number of superseded remote ratchet keys remembered so late
    /// messages on them are recognised instead of triggering a DH step.
    pub max_retired_chains: usize,
}

impl SessionConfig {
    /// Default skipped-key cache size.
    pub const DEFAULT_MAX_SKIPPED_KEYS: usize = 40;

    /// Default per-chain skip limit.
    pub const DEFAULT_MAX_SKIP: u32 = 1000;

    /// Default number of retired remote ratchet keys.
    pub const DEFAULT_MAX_RETIRED_CHAINS: usize = 5;
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skipped_keys: Self::DEFAULT_MAX_SKIPPED_KEYS,
            max_skip: Self::DEFAULT_MAX_SKIP,
            max_retired_chains: Self::DEFAULT_MAX_RETIRED_CHAINS,
        }
    }
}

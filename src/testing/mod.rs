//! Shared test utilities
//!
//! Compiled for unit tests and, behind the `testing` feature, for the
//! integration suite. Fixtures build real components wired to the
//! in-memory stores; nothing here touches the network.

pub mod fixtures;

pub use fixtures::TestFixtures;

/// Test-only constant inputs.
pub mod constants {
    use crate::utils::crypto::KeySet;

    /// Master cookie key for tests. 98 bytes, comfortably above the
    /// minimum the key derivation enforces.
    pub const TEST_MASTER_KEY: &[u8] =
        b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789abcdefghijklmnopqrstuvwxyz";

    /// Cookie sub-keys derived from [`TEST_MASTER_KEY`].
    ///
    /// # Panics
    ///
    /// Panics if derivation fails, which cannot happen for the fixed key.
    #[must_use]
    pub fn test_key_set() -> KeySet {
        KeySet::derive(TEST_MASTER_KEY).expect("test master key must derive")
    }
}

/// In-memory store implementations, re-exported under the name the test
/// suites use for them.
pub mod mock {
    pub use crate::storage::memory::{MemoryRoleStore, MemorySessionStore, MemoryUserStore};
}

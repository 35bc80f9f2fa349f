//! Key fingerprinting.
//!
//! Every key is reduced to a 128-bit fingerprint split into two halves:
//! the *key hash* indexes every internal structure (store shards, policy
//! ledger, frequency sketch), and the *conflict hash* disambiguates two
//! distinct keys that happen to share a key hash.  The key itself is never
//! stored.

use std::hash::Hash;

use ahash::RandomState;

/// Seeds for the key-hash fingerprint.  Fixed so that hashing is
/// deterministic across cache instances and process restarts.
const KEY_SEEDS: (u64, u64, u64, u64) = (
    0x1122_3344_5566_7788,
    0x9D49_0B2C_35D9_44CB,
    0x42F6_B0D8_A1C3_59E7,
    0x6A09_E667_F3BC_C908,
);

/// Seeds for the conflict-hash fingerprint.  Independent of [`KEY_SEEDS`]
/// so the two halves are uncorrelated.
const CONFLICT_SEEDS: (u64, u64, u64, u64) = (
    0x8877_6655_4433_2211,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_6791_9E37_79F9,
    0xBB67_AE85_84CA_A73B,
);

/// Maps a key to its `(key_hash, conflict_hash)` fingerprint.
///
/// Implementations must be deterministic: the same key must always produce
/// the same fingerprint.  Distribution quality directly affects admission
/// fairness, since the frequency sketch sees only key hashes.
pub trait KeyHasher<K: ?Sized>: Send + Sync + 'static {
    fn hash(&self, key: &K) -> (u64, u64);
}

// ---------------------------------------------------------------------------
// Default implementation
// ---------------------------------------------------------------------------

/// The default [`KeyHasher`]: two independently seeded fingerprints of the
/// key, computed with the same hasher the store and policy use internally.
pub struct DefaultKeyHasher {
    primary: RandomState,
    secondary: RandomState,
}

impl DefaultKeyHasher {
    pub fn new() -> Self {
        let (k0, k1, k2, k3) = KEY_SEEDS;
        let (c0, c1, c2, c3) = CONFLICT_SEEDS;
        DefaultKeyHasher {
            primary: RandomState::with_seeds(k0, k1, k2, k3),
            secondary: RandomState::with_seeds(c0, c1, c2, c3),
        }
    }
}

impl Default for DefaultKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + ?Sized> KeyHasher<K> for DefaultKeyHasher {
    #[inline]
    fn hash(&self, key: &K) -> (u64, u64) {
        (self.primary.hash_one(key), self.secondary.hash_one(key))
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// A [`KeyHasher`] backed by a closure.
///
/// Created via [`CacheBuilder::key_to_hash`](crate::CacheBuilder::key_to_hash).
pub struct FnHasher<F>(pub F);

impl<K: ?Sized, F> KeyHasher<K> for FnHasher<F>
where
    F: Fn(&K) -> (u64, u64) + Send + Sync + 'static,
{
    #[inline]
    fn hash(&self, key: &K) -> (u64, u64) {
        (self.0)(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

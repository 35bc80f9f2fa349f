use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::RwLock;

/// Shards in the store.  Each key hash is owned by exactly one shard.
const NUM_SHARDS: u64 = 256;

// ---------------------------------------------------------------------------
// StoreItem
// ---------------------------------------------------------------------------

/// A single stored entry.
///
/// The user's key is never kept, only its fingerprint.  `conflict`
/// disambiguates two distinct keys that collide on `key`; an operation
/// carrying the wrong conflict hash behaves as a miss.  `expires_at =
/// None` means the entry never expires; the deadline is checked lazily by
/// the cache on `get`, never by a timer.
pub(crate) struct StoreItem<V> {
    pub key: u64,
    pub conflict: u64,
    pub value: Arc<V>,
    pub cost: i64,
    pub expires_at: Option<Instant>,
}

/// Result of a processor-side insert.
pub(crate) enum SetOutcome<V> {
    /// The item landed; holds the value it replaced, if any.
    Stored(Option<Arc<V>>),
    /// A colliding key owns the slot; the item was not stored.
    Refused(StoreItem<V>),
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Padded to a cache line so neighbouring shard locks don't false-share.
#[repr(align(64))]
struct Shard<V> {
    map: RwLock<AHashMap<u64, StoreItem<V>>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// The concurrent key-hash → item mapping, split across [`NUM_SHARDS`]
/// independently locked submaps.
///
/// Reads take a shared lock, writes an exclusive lock, both per-shard.
/// Nothing here blocks for longer than one map operation.
pub(crate) struct ShardedStore<V> {
    shards: Box<[Shard<V>]>,
}

impl<V> ShardedStore<V> {
    pub(crate) fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ShardedStore { shards }
    }

    #[inline]
    fn shard(&self, key: u64) -> &Shard<V> {
        &self.shards[(key % NUM_SHARDS) as usize]
    }

    /// Returns the value and deadline for `key`, or `None` on a missing
    /// entry or conflict mismatch.  Conflict 0 skips the conflict check.
    ///
    /// Expiry is the caller's concern: the deadline is returned, not
    /// enforced, so the cache can evict and fire callbacks outside the
    /// shard lock.
    pub(crate) fn get(&self, key: u64, conflict: u64) -> Option<(Arc<V>, Option<Instant>)> {
        let map = self.shard(key).map.read();
        let item = map.get(&key)?;
        if conflict != 0 && conflict != item.conflict {
            return None;
        }
        Some((Arc::clone(&item.value), item.expires_at))
    }

    /// Inserts `item`, overwriting a resident entry for its key hash.
    /// Only the processor calls this, after admission.
    ///
    /// A resident entry with a *different* conflict hash belongs to
    /// another key that happens to share the slot; overwriting it would
    /// let one key clobber another, so the insert is refused and the item
    /// handed back.  Conflict 0 overwrites unconditionally.
    pub(crate) fn set(&self, item: StoreItem<V>) -> SetOutcome<V> {
        let mut map = self.shard(item.key).map.write();
        if let Some(resident) = map.get(&item.key) {
            if item.conflict != 0 && item.conflict != resident.conflict {
                return SetOutcome::Refused(item);
            }
        }
        SetOutcome::Stored(map.insert(item.key, item).map(|prev| prev.value))
    }

    /// Replaces the value and cost for `key` only when an entry exists and
    /// the conflict hash matches.  Called from the writer's own thread on
    /// `set`, ahead of the policy seeing the event.
    ///
    /// Returns the previous value when the entry was replaced.
    pub(crate) fn update(
        &self,
        key: u64,
        conflict: u64,
        value: Arc<V>,
        cost: i64,
        expires_at: Option<Instant>,
    ) -> Option<Arc<V>> {
        let mut map = self.shard(key).map.write();
        let item = map.get_mut(&key)?;
        if conflict != 0 && conflict != item.conflict {
            return None;
        }
        item.cost = cost;
        item.expires_at = expires_at;
        Some(std::mem::replace(&mut item.value, value))
    }

    /// Removes the entry for `key` when the conflict hash matches
    /// (conflict 0 matches anything).  Returns the removed item.
    pub(crate) fn remove(&self, key: u64, conflict: u64) -> Option<StoreItem<V>> {
        let mut map = self.shard(key).map.write();
        let item = map.get(&key)?;
        if conflict != 0 && conflict != item.conflict {
            return None;
        }
        map.remove(&key)
    }

    /// Drains every shard, handing each removed item to `on_evict`.
    pub(crate) fn clear(&self, mut on_evict: impl FnMut(StoreItem<V>)) {
        for shard in self.shards.iter() {
            let drained = std::mem::take(&mut *shard.map.write());
            for (_, item) in drained {
                on_evict(item);
            }
        }
    }

    /// Best-effort traversal of all resident values.  `f` returning
    /// `false` stops the walk.  Items written while iterating may or may
    /// not be seen; the snapshot is per-shard, not global.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&Arc<V>) -> bool) {
        for shard in self.shards.iter() {
            let map = shard.map.read();
            for item in map.values() {
                if !f(&item.value) {
                    return;
                }
            }
        }
    }

    /// Total entries across all shards.  Transiently inconsistent with the
    /// policy ledger while events are in flight.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, Entry};
use crate::error::BuildError;
use crate::hash::{DefaultKeyHasher, FnHasher, KeyHasher};

/// Builder for configuring and constructing a [`Cache`].
///
/// Two options are required up front: `num_counters`, the number of keys
/// the admission filter tracks frequencies for (a good rule of thumb is
/// 10× the number of items you expect when full), and `max_cost`, the
/// total cost budget in whatever units you pass to
/// [`set_with_cost`](Cache::set_with_cost), commonly bytes.
///
/// # Example
/// ```
/// use lungo::CacheBuilder;
///
/// let cache: lungo::Cache<String, Vec<u8>> = CacheBuilder::new(100_000, 16 << 20)
///     .metrics(true)
///     .cost(|v: &Vec<u8>| v.len() as i64)
///     .build()
///     .unwrap();
/// # drop(cache);
/// ```
pub struct CacheBuilder<K: ?Sized, V> {
    pub(crate) num_counters: usize,
    pub(crate) max_cost: i64,
    pub(crate) buffer_items: usize,
    pub(crate) metrics: bool,
    pub(crate) ttl: Option<Duration>,
    pub(crate) ignore_internal_cost: bool,
    pub(crate) hasher: Option<Box<dyn KeyHasher<K>>>,
    pub(crate) cost_fn: Option<Box<dyn Fn(&V) -> i64 + Send + Sync>>,
    pub(crate) on_evict: Option<Box<dyn Fn(&Entry<V>) + Send + Sync>>,
    pub(crate) on_reject: Option<Box<dyn Fn(&Entry<V>) + Send + Sync>>,
    pub(crate) on_exit: Option<Box<dyn Fn(Arc<V>) + Send + Sync>>,
}

impl<K: ?Sized, V> CacheBuilder<K, V> {
    pub fn new(num_counters: usize, max_cost: i64) -> Self {
        CacheBuilder {
            num_counters,
            max_cost,
            buffer_items: 64,
            metrics: false,
            ttl: None,
            ignore_internal_cost: false,
            hasher: None,
            cost_fn: None,
            on_evict: None,
            on_reject: None,
            on_exit: None,
        }
    }

    /// Capacity of each read ring (default: 64).  Rarely worth changing.
    pub fn buffer_items(mut self, n: usize) -> Self {
        self.buffer_items = n;
        self
    }

    /// Enables metric collection.  Keeping statistics costs a little
    /// throughput, so it's off by default.
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Entries expire `ttl` after they were written (or replaced).
    ///
    /// Expiry is lazy: an expired entry is removed when a `get` observes
    /// it, not by a timer.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Skips the fixed per-entry accounting overhead, so costs count user
    /// units only.  Useful when `max_cost` is not in bytes.
    pub fn ignore_internal_cost(mut self, ignore: bool) -> Self {
        self.ignore_internal_cost = ignore;
        self
    }

    /// Overrides the key-fingerprint function with a closure.
    ///
    /// The closure must be deterministic.  Returning the same pair for two
    /// distinct keys makes the cache treat them as one key.
    pub fn key_to_hash<F>(mut self, f: F) -> Self
    where
        F: Fn(&K) -> (u64, u64) + Send + Sync + 'static,
    {
        self.hasher = Some(Box::new(FnHasher(f)));
        self
    }

    /// Overrides the key-fingerprint function with a [`KeyHasher`]
    /// implementation.
    pub fn key_hasher<H: KeyHasher<K>>(mut self, hasher: H) -> Self {
        self.hasher = Some(Box::new(hasher));
        self
    }

    /// Computes an item's cost lazily when `set` is called with cost 0.
    /// Runs on the processor thread, off the caller's hot path.
    pub fn cost<F>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> i64 + Send + Sync + 'static,
    {
        self.cost_fn = Some(Box::new(f));
        self
    }

    /// Invoked once for every item evicted by the policy (or observed
    /// expired).  Runs on the processor thread; keep it fast and never
    /// call back into this cache from it.  A panic in any callback is
    /// caught so the processor keeps running, but the rest of that
    /// event's handling is abandoned.
    pub fn on_evict<F>(mut self, f: F) -> Self
    where
        F: Fn(&Entry<V>) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(f));
        self
    }

    /// Invoked once for every item the admission policy turns away.
    pub fn on_reject<F>(mut self, f: F) -> Self
    where
        F: Fn(&Entry<V>) + Send + Sync + 'static,
    {
        self.on_reject = Some(Box::new(f));
        self
    }

    /// Invoked once for every value that leaves the cache, whether by eviction,
    /// rejection, deletion, replacement, or `clear`.
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn(Arc<V>) + Send + Sync + 'static,
    {
        self.on_exit = Some(Box::new(f));
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + ?Sized + 'static,
    V: Send + Sync + 'static,
{
    /// Validates the configuration and starts the cache (including its
    /// background processor).
    pub fn build(mut self) -> Result<Cache<K, V>, BuildError> {
        if self.num_counters == 0 {
            return Err(BuildError::ZeroNumCounters);
        }
        if self.max_cost == 0 {
            return Err(BuildError::ZeroMaxCost);
        }
        if self.buffer_items == 0 {
            return Err(BuildError::ZeroBufferItems);
        }
        let hasher = self
            .hasher
            .take()
            .unwrap_or_else(|| Box::new(DefaultKeyHasher::new()));
        Ok(Cache::from_builder(self, hasher))
    }
}

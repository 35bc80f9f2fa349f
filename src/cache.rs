use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::buffer::read::{Offer, ReadRings};
use crate::buffer::write::{Event, WriteBuffer, SET_BUFFER_SIZE};
use crate::builder::CacheBuilder;
use crate::hash::KeyHasher;
use crate::metrics::stats::{MetricType, Metrics};
use crate::policy::LfuPolicy;
use crate::store::{SetOutcome, ShardedStore, StoreItem};

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// The record handed to the `on_evict` and `on_reject` callbacks.
///
/// The cache never stores user keys, so the record identifies the item by
/// its fingerprint.  `value` is `None` when the item had already left the
/// store by the time the callback fired (for example a victim that raced
/// an explicit delete).
#[derive(Debug)]
pub struct Entry<V> {
    pub key: u64,
    pub conflict: u64,
    pub value: Option<Arc<V>>,
    pub cost: i64,
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// The user's lifecycle callbacks, composed the way the public contract
/// promises: every value leaving the cache passes through `on_exit`
/// exactly once, whether it left by eviction, rejection, deletion,
/// replacement, or `clear`.
pub(crate) struct Callbacks<V> {
    pub(crate) on_evict: Option<Box<dyn Fn(&Entry<V>) + Send + Sync>>,
    pub(crate) on_reject: Option<Box<dyn Fn(&Entry<V>) + Send + Sync>>,
    pub(crate) on_exit: Option<Box<dyn Fn(Arc<V>) + Send + Sync>>,
}

impl<V> Callbacks<V> {
    fn exit(&self, value: Option<Arc<V>>) {
        if let (Some(f), Some(v)) = (&self.on_exit, value) {
            f(v);
        }
    }

    fn evict(&self, entry: Entry<V>) {
        if let Some(f) = &self.on_evict {
            f(&entry);
        }
        self.exit(entry.value);
    }

    fn reject(&self, entry: Entry<V>) {
        if let Some(f) = &self.on_reject {
            f(&entry);
        }
        self.exit(entry.value);
    }
}

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

pub(crate) struct Inner<K: ?Sized, V> {
    store: ShardedStore<V>,
    policy: LfuPolicy,
    read_rings: ReadRings,
    write_buf: WriteBuffer<V>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    hasher: Box<dyn KeyHasher<K>>,
    callbacks: Callbacks<V>,
    cost_fn: Option<Box<dyn Fn(&V) -> i64 + Send + Sync>>,
    ignore_internal_cost: bool,
    /// Fixed accounting overhead added to every item's cost unless
    /// `ignore_internal_cost` is set.
    item_overhead: i64,
    ttl: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
    is_closed: AtomicBool,
}

impl<K: ?Sized, V> Inner<K, V> {
    #[inline]
    fn record(&self, t: MetricType, hash: u64, delta: u64) {
        if let Some(m) = &self.metrics {
            m.add(t, hash, delta);
        }
    }

    /// Resolves the final cost of an item: lazy computation when the
    /// caller passed 0 and a cost function is configured, plus the fixed
    /// per-entry overhead unless disabled.
    fn finalize_cost(&self, value: &Arc<V>, mut cost: i64) -> i64 {
        if cost == 0 {
            if let Some(f) = &self.cost_fn {
                cost = f(value);
            }
        }
        if !self.ignore_internal_cost {
            cost += self.item_overhead;
        }
        cost
    }

    /// Applies one set-buffer event.  Runs only on the processor thread,
    /// which makes it the sole writer of policy state and the sole caller
    /// of `store.set`.
    fn handle_event(&self, event: Event<V>) {
        match event {
            Event::Sync(done) => {
                // Everything ahead of this marker has been applied.
                let _ = done.send(());
            }
            Event::New {
                key,
                conflict,
                value,
                cost,
                expires_at,
            } => {
                let cost = self.finalize_cost(&value, cost);
                let (victims, added) = self.policy.add(key, cost);
                if added {
                    let outcome = self.store.set(StoreItem {
                        key,
                        conflict,
                        value,
                        cost,
                        expires_at,
                    });
                    self.record(MetricType::KeysAdded, key, 1);
                    match outcome {
                        SetOutcome::Stored(prev) => self.callbacks.exit(prev),
                        // A colliding key owns the slot; this value never
                        // became reachable, so it exits right away.
                        SetOutcome::Refused(item) => self.callbacks.exit(Some(item.value)),
                    }
                } else {
                    self.callbacks.reject(Entry {
                        key,
                        conflict,
                        value: Some(value),
                        cost,
                    });
                }
                for victim in victims {
                    // Conflict 0: the victim owns its slot, whatever the
                    // stored conflict hash is.
                    let entry = match self.store.remove(victim.key, 0) {
                        Some(item) => Entry {
                            key: victim.key,
                            conflict: item.conflict,
                            value: Some(item.value),
                            cost: victim.cost,
                        },
                        None => Entry {
                            key: victim.key,
                            conflict: 0,
                            value: None,
                            cost: victim.cost,
                        },
                    };
                    self.callbacks.evict(entry);
                }
            }
            Event::Update { key, value, cost } => {
                // The store was already updated on the caller's thread;
                // only the ledger needs the (possibly lazily computed)
                // cost.
                let cost = self.finalize_cost(&value, cost);
                self.policy.update(key, cost);
            }
            Event::Delete { key, conflict } => {
                self.policy.delete(key);
                let removed = self.store.remove(key, conflict);
                self.callbacks.exit(removed.map(|item| item.value));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

fn spawn_processor<K, V>(inner: &Arc<Inner<K, V>>)
where
    K: ?Sized + 'static,
    V: Send + Sync + 'static,
{
    let weak = Arc::downgrade(inner);
    let events = inner.write_buf.receiver();
    let stop = inner.stop_rx.clone();
    std::thread::spawn(move || process_events(weak, events, stop));
}

/// The background processor loop: the only mutator of policy state.
///
/// Holds a `Weak` reference so that dropping the last cache handle
/// disconnects the event channel and the thread unwinds on its own; the
/// stop channel serves `clear` and `close`, which need a synchronous
/// handshake.
fn process_events<K, V>(weak: Weak<Inner<K, V>>, events: Receiver<Event<V>>, stop: Receiver<()>)
where
    K: ?Sized,
    V: Send + Sync,
{
    trace!("cache processor running");
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { return };
                let Some(inner) = weak.upgrade() else { return };
                // User callbacks run on this thread, outside every lock.
                // A panicking callback must not kill the processor while
                // the cache is still open.
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    inner.handle_event(event);
                }));
                if outcome.is_err() {
                    warn!("a cache callback panicked; the event was abandoned");
                }
            }
            recv(stop) -> _msg => {
                trace!("cache processor stopped");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A thread-safe, bounded, in-memory cache with a TinyLFU admission
/// policy and sampled-LFU eviction.
///
/// Reads and writes never block on policy maintenance: reads batch their
/// frequency updates through lossy rings, writes travel through a bounded
/// event buffer, and a single background processor applies both to the
/// policy.  The cache is a best-effort optimization layer: writes may be
/// dropped under extreme contention and a `true` from [`set`](Cache::set)
/// is an admission *hint*, not a guarantee.
///
/// Handles are cheap to clone and share one cache.
///
/// # Example
/// ```
/// let cache: lungo::Cache<String, String> = lungo::CacheBuilder::new(10_000, 1_000)
///     .ignore_internal_cost(true)
///     .build()
///     .unwrap();
/// cache.set_with_cost(&"hello".to_string(), "world".to_string(), 1);
/// cache.wait();
/// assert_eq!(*cache.get(&"hello".to_string()).unwrap(), "world");
/// ```
pub struct Cache<K: ?Sized, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K: ?Sized, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: ?Sized + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_builder(
        builder: CacheBuilder<K, V>,
        hasher: Box<dyn KeyHasher<K>>,
    ) -> Self {
        let metrics = builder.metrics.then(|| Arc::new(Metrics::new()));
        let policy = LfuPolicy::new(builder.num_counters, builder.max_cost);
        if let Some(m) = &metrics {
            policy.collect_metrics(Arc::clone(m));
        }
        // Rendezvous channel: a stop send completes only once the
        // processor has taken it, which is the handshake `clear` and
        // `close` rely on.
        let (stop_tx, stop_rx) = bounded(0);

        let inner = Arc::new(Inner {
            store: ShardedStore::new(),
            policy,
            read_rings: ReadRings::new(builder.buffer_items),
            write_buf: WriteBuffer::new(SET_BUFFER_SIZE),
            stop_tx,
            stop_rx,
            hasher,
            callbacks: Callbacks {
                on_evict: builder.on_evict,
                on_reject: builder.on_reject,
                on_exit: builder.on_exit,
            },
            cost_fn: builder.cost_fn,
            ignore_internal_cost: builder.ignore_internal_cost,
            item_overhead: std::mem::size_of::<StoreItem<V>>() as i64,
            ttl: builder.ttl,
            metrics,
            is_closed: AtomicBool::new(false),
        });
        spawn_processor(&inner);
        Cache { inner }
    }

    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder(num_counters: usize, max_cost: i64) -> CacheBuilder<K, V> {
        CacheBuilder::new(num_counters, max_cost)
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.inner.is_closed.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Hot path: get
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if present and not expired.
    ///
    /// Never blocks: the frequency sighting is offered to a lossy ring and
    /// the store read takes one shared shard lock.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if self.is_closed() {
            return None;
        }
        let (key_hash, conflict_hash) = self.inner.hasher.hash(key);

        match self.inner.read_rings.offer(key_hash) {
            Offer::Recorded => self.inner.record(MetricType::GetsKept, key_hash, 1),
            Offer::Dropped => self.inner.record(MetricType::GetsDropped, key_hash, 1),
            Offer::Batch(batch) => {
                self.inner.record(MetricType::GetsKept, key_hash, 1);
                // Best-effort: a contended policy simply loses the batch.
                self.inner.policy.push(&batch);
            }
        }

        let Some((value, expires_at)) = self.inner.store.get(key_hash, conflict_hash) else {
            self.inner.record(MetricType::Miss, key_hash, 1);
            return None;
        };
        if let Some(deadline) = expires_at {
            if Instant::now() >= deadline {
                self.evict_expired(key_hash, conflict_hash);
                self.inner.record(MetricType::Miss, key_hash, 1);
                return None;
            }
        }
        self.inner.record(MetricType::Hit, key_hash, 1);
        Some(value)
    }

    /// Removes an entry observed past its deadline and lets the ledger
    /// catch up through a best-effort delete event.
    fn evict_expired(&self, key_hash: u64, conflict_hash: u64) {
        if let Some(item) = self.inner.store.remove(key_hash, conflict_hash) {
            // A full buffer leaves the cost to be reclaimed by a later
            // admission; a read must not block here.
            let _ = self.inner.write_buf.try_push(Event::Delete {
                key: key_hash,
                conflict: conflict_hash,
            });
            self.inner.callbacks.evict(Entry {
                key: key_hash,
                conflict: item.conflict,
                value: Some(item.value),
                cost: item.cost,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Hot path: set
    // -----------------------------------------------------------------------

    /// Inserts or replaces the value for `key`, computing its cost lazily
    /// via the configured cost function.
    ///
    /// See [`set_with_cost`](Cache::set_with_cost) for the meaning of the
    /// return value.
    pub fn set(&self, key: &K, value: V) -> bool {
        self.set_with_cost(key, value, 0)
    }

    /// Inserts or replaces the value for `key` with an explicit cost.
    ///
    /// Never blocks.  Returns `true` when the item reached the set buffer
    /// or an existing entry was updated in place; `false` when the buffer
    /// was full and the item was dropped.  `true` is a hint, not a
    /// guarantee, since the admission policy may still reject the item.
    pub fn set_with_cost(&self, key: &K, value: V, cost: i64) -> bool {
        if self.is_closed() {
            return false;
        }
        let (key_hash, conflict_hash) = self.inner.hasher.hash(key);
        let value = Arc::new(value);
        let expires_at = self.inner.ttl.map(|ttl| Instant::now() + ttl);

        // Replace in place first so readers see the new value even while
        // the event is still queued.
        if let Some(prev) = self.inner.store.update(
            key_hash,
            conflict_hash,
            Arc::clone(&value),
            cost,
            expires_at,
        ) {
            self.inner.callbacks.exit(Some(prev));
            // The store already carries the new value; losing the event
            // only delays the ledger's cost adjustment.
            let _ = self.inner.write_buf.try_push(Event::Update {
                key: key_hash,
                value,
                cost,
            });
            return true;
        }

        let event = Event::New {
            key: key_hash,
            conflict: conflict_hash,
            value,
            cost,
            expires_at,
        };
        match self.inner.write_buf.try_push(event) {
            Ok(()) => true,
            Err(_) => {
                self.inner.record(MetricType::SetsDropped, key_hash, 1);
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`, if present.
    ///
    /// The store entry disappears before this returns; the policy catches
    /// up through a delete event that rides the set buffer *behind* any
    /// in-flight set of the same key, preserving set→delete order.
    pub fn delete(&self, key: &K) {
        if self.is_closed() {
            return;
        }
        let (key_hash, conflict_hash) = self.inner.hasher.hash(key);
        let removed = self.inner.store.remove(key_hash, conflict_hash);
        self.inner.callbacks.exit(removed.map(|item| item.value));
        self.inner.write_buf.push(Event::Delete {
            key: key_hash,
            conflict: conflict_hash,
        });
    }

    // -----------------------------------------------------------------------
    // Quiescence
    // -----------------------------------------------------------------------

    /// Blocks until the processor has applied every operation submitted
    /// before this call.
    pub fn wait(&self) {
        if self.is_closed() {
            return;
        }
        let (done_tx, done_rx) = bounded(1);
        self.inner.write_buf.push(Event::Sync(done_tx));
        let _ = done_rx.recv();
    }

    // -----------------------------------------------------------------------
    // Bulk / admin operations
    // -----------------------------------------------------------------------

    /// Empties the cache: stops the processor, drains pending events,
    /// clears the policy and the store (firing the evict callbacks),
    /// resets metrics, and restarts the processor.
    ///
    /// Best-effort under concurrency: sets racing a `clear` may be
    /// observed by the cleared state.  Don't overlap them if exact
    /// emptiness matters.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        debug!("clearing cache");
        let _ = self.inner.stop_tx.send(());

        while let Some(event) = self.inner.write_buf.try_pop() {
            match event {
                Event::Sync(done) => {
                    let _ = done.send(());
                }
                // The store already carries updated values; nothing to
                // unwind.
                Event::Update { .. } => {}
                Event::New {
                    key,
                    conflict,
                    value,
                    cost,
                    ..
                } => {
                    self.inner.callbacks.evict(Entry {
                        key,
                        conflict,
                        value: Some(value),
                        cost,
                    });
                }
                Event::Delete { key, conflict } => {
                    self.inner.callbacks.evict(Entry {
                        key,
                        conflict,
                        value: None,
                        cost: 0,
                    });
                }
            }
        }

        self.inner.policy.clear();
        let callbacks = &self.inner.callbacks;
        self.inner.store.clear(|item| {
            callbacks.evict(Entry {
                key: item.key,
                conflict: item.conflict,
                value: Some(item.value),
                cost: item.cost,
            });
        });
        if let Some(metrics) = &self.inner.metrics {
            metrics.clear();
        }
        spawn_processor(&self.inner);
    }

    /// Shuts the cache down.  Idempotent; every operation after the first
    /// `close` is a no-op returning the zero value of its result domain.
    pub fn close(&self) {
        if self.inner.is_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing cache");
        let _ = self.inner.stop_tx.send(());
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of resident entries.  May transiently disagree with the
    /// policy ledger while events are in flight.
    pub fn len(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the costs of all admitted items.
    pub fn used_capacity(&self) -> i64 {
        if self.is_closed() {
            return 0;
        }
        self.inner.policy.used()
    }

    /// The configured cost budget.
    pub fn max_capacity(&self) -> i64 {
        if self.is_closed() {
            return 0;
        }
        self.inner.policy.max_cost()
    }

    /// Replaces the cost budget.  Shrinking does not evict immediately;
    /// the next admission brings `used_capacity` back under the line.
    pub fn set_capacity(&self, max_cost: i64) {
        if self.is_closed() {
            return;
        }
        self.inner.policy.update_max_cost(max_cost);
    }

    /// Best-effort traversal of resident values.  `f` returning `false`
    /// stops the walk.  Entries written during the walk may be missed.
    pub fn for_each(&self, f: impl FnMut(&Arc<V>) -> bool) {
        if self.is_closed() {
            return;
        }
        self.inner.store.for_each(f);
    }

    /// The live metric counters, if the cache was built with
    /// [`CacheBuilder::metrics`](crate::CacheBuilder::metrics).
    pub fn metrics(&self) -> Option<&Metrics> {
        self.inner.metrics.as_deref()
    }

    /// Number of hits, or 0 when metrics are disabled.
    pub fn hits(&self) -> u64 {
        self.inner.metrics.as_ref().map_or(0, |m| m.hits())
    }

    /// Number of misses, or 0 when metrics are disabled.
    pub fn misses(&self) -> u64 {
        self.inner.metrics.as_ref().map_or(0, |m| m.misses())
    }

    /// Number of evicted keys, or 0 when metrics are disabled.
    pub fn evictions(&self) -> u64 {
        self.inner.metrics.as_ref().map_or(0, |m| m.keys_evicted())
    }
}

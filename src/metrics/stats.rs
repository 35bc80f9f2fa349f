//! Striped atomic counters.
//!
//! Every metric kind owns 256 independent `AtomicU64`s.  Update sites pick
//! a stripe from the key hash via `(hash % 25) * 10`, which spaces live
//! counters ten slots (80 bytes) apart so two hot keys rarely contend on
//! the same cache line.  Readers sum all 256 stripes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stripes per metric kind.
const NUM_STRIPES: usize = 256;

/// The metric kinds tracked by the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Hit,
    Miss,
    KeysAdded,
    KeysUpdated,
    KeysEvicted,
    CostAdded,
    CostEvicted,
    SetsDropped,
    SetsRejected,
    GetsDropped,
    GetsKept,
}

const ALL_METRICS: [MetricType; 11] = [
    MetricType::Hit,
    MetricType::Miss,
    MetricType::KeysAdded,
    MetricType::KeysUpdated,
    MetricType::KeysEvicted,
    MetricType::CostAdded,
    MetricType::CostEvicted,
    MetricType::SetsDropped,
    MetricType::SetsRejected,
    MetricType::GetsDropped,
    MetricType::GetsKept,
];

impl MetricType {
    fn label(self) -> &'static str {
        match self {
            MetricType::Hit => "hit",
            MetricType::Miss => "miss",
            MetricType::KeysAdded => "keys-added",
            MetricType::KeysUpdated => "keys-updated",
            MetricType::KeysEvicted => "keys-evicted",
            MetricType::CostAdded => "cost-added",
            MetricType::CostEvicted => "cost-evicted",
            MetricType::SetsDropped => "sets-dropped",
            MetricType::SetsRejected => "sets-rejected",
            MetricType::GetsDropped => "gets-dropped",
            MetricType::GetsKept => "gets-kept",
        }
    }
}

/// A running log of cache statistics, live for the lifetime of the cache.
///
/// Obtained from [`Cache::metrics`](crate::Cache::metrics) when the cache
/// was built with [`CacheBuilder::metrics`](crate::CacheBuilder::metrics).
/// All accessors read live counters; two consecutive calls may differ.
pub struct Metrics {
    all: [[AtomicU64; NUM_STRIPES]; 11],
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Metrics {
            all: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
        }
    }

    #[inline]
    pub(crate) fn add(&self, t: MetricType, hash: u64, delta: u64) {
        let idx = ((hash % 25) * 10) as usize;
        self.all[t as usize][idx].fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn get(&self, t: MetricType) -> u64 {
        self.all[t as usize]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Number of `get` calls that found a value.
    pub fn hits(&self) -> u64 {
        self.get(MetricType::Hit)
    }

    /// Number of `get` calls that found nothing.
    pub fn misses(&self) -> u64 {
        self.get(MetricType::Miss)
    }

    /// Number of new key-value items admitted by the policy.
    pub fn keys_added(&self) -> u64 {
        self.get(MetricType::KeysAdded)
    }

    /// Number of `set` calls that updated an existing item in place.
    pub fn keys_updated(&self) -> u64 {
        self.get(MetricType::KeysUpdated)
    }

    /// Number of keys removed by eviction or explicit deletion.
    pub fn keys_evicted(&self) -> u64 {
        self.get(MetricType::KeysEvicted)
    }

    /// Sum of the costs of all admitted items.
    pub fn cost_added(&self) -> u64 {
        self.get(MetricType::CostAdded)
    }

    /// Sum of the costs of all evicted items.
    pub fn cost_evicted(&self) -> u64 {
        self.get(MetricType::CostEvicted)
    }

    /// Number of `set` calls dropped because the set buffer was full.
    pub fn sets_dropped(&self) -> u64 {
        self.get(MetricType::SetsDropped)
    }

    /// Number of `set` calls rejected by the admission policy.
    pub fn sets_rejected(&self) -> u64 {
        self.get(MetricType::SetsRejected)
    }

    /// Number of read events dropped because a read ring was full.
    pub fn gets_dropped(&self) -> u64 {
        self.get(MetricType::GetsDropped)
    }

    /// Number of read events recorded into a read ring.
    pub fn gets_kept(&self) -> u64 {
        self.get(MetricType::GetsKept)
    }

    /// `hits / (hits + misses)`, or `0.0` before the first `get`.
    pub fn ratio(&self) -> f64 {
        let (hits, misses) = (self.hits(), self.misses());
        if hits == 0 && misses == 0 {
            return 0.0;
        }
        hits as f64 / (hits + misses) as f64
    }

    /// Zeroes every counter.
    pub(crate) fn clear(&self) {
        for kind in &self.all {
            for counter in kind {
                counter.store(0, Ordering::Relaxed);
            }
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in ALL_METRICS {
            write!(f, "{}: {} ", t.label(), self.get(t))?;
        }
        write!(f, "gets-total: {} ", self.hits() + self.misses())?;
        write!(f, "hit-ratio: {:.2}", self.ratio())
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metrics {{ {} }}", self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

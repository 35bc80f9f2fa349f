//! Admission and eviction policy.
//!
//! [`LfuPolicy`] is a thin facade over the TinyLFU admission filter and
//! the sampled-LFU cost ledger, both guarded by a single mutex.  The
//! background processor is the only caller of the mutating operations;
//! user threads touch the policy solely through the nonblocking [`push`]
//! used when a read ring drains.
//!
//! [`push`]: LfuPolicy::push

pub(crate) mod sampled;
pub(crate) mod sketch;
pub(crate) mod tinylfu;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::metrics::stats::{MetricType, Metrics};
use self::sampled::SampledLfu;
use self::tinylfu::TinyLfu;

/// A resident item displaced during admission.  The processor removes it
/// from the store and fires the evict callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Victim {
    pub key: u64,
    pub cost: i64,
}

pub(crate) struct LfuPolicy {
    inner: Mutex<PolicyInner>,
}

struct PolicyInner {
    admit: TinyLfu,
    evict: SampledLfu,
    metrics: Option<Arc<Metrics>>,
}

impl LfuPolicy {
    pub(crate) fn new(num_counters: usize, max_cost: i64) -> Self {
        LfuPolicy {
            inner: Mutex::new(PolicyInner {
                admit: TinyLfu::new(num_counters),
                evict: SampledLfu::new(max_cost),
                metrics: None,
            }),
        }
    }

    /// Wires up metric collection.  Called once, before the processor
    /// starts.
    pub(crate) fn collect_metrics(&self, metrics: Arc<Metrics>) {
        let mut inner = self.inner.lock();
        inner.evict.collect_metrics(Arc::clone(&metrics));
        inner.metrics = Some(metrics);
    }

    /// Applies a drained read-ring batch to the admission filter.
    ///
    /// Nonblocking: if the policy mutex is contended the batch is
    /// discarded; the sketch is approximate and a reader must never
    /// stall here.  Returns whether the batch was applied.
    pub(crate) fn push(&self, batch: &[u64]) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.inner.try_lock() {
            Some(mut inner) => {
                inner.admit.push(batch);
                true
            }
            None => false,
        }
    }

    /// Runs the admission decision for `(key, cost)`.
    ///
    /// Returns the victims to remove from the store and whether the
    /// candidate was admitted.  Rejection can still hand back victims:
    /// space reclaimed before the candidate lost its frequency duel stays
    /// reclaimed.
    pub(crate) fn add(&self, key: u64, cost: i64) -> (Vec<Victim>, bool) {
        self.inner.lock().add(key, cost)
    }

    /// Adjusts the cost of an already-admitted key.
    pub(crate) fn update(&self, key: u64, cost: i64) {
        self.inner.lock().evict.update_if_present(key, cost);
    }

    /// Removes `key` from the ledger, if present.
    pub(crate) fn delete(&self, key: u64) {
        self.inner.lock().evict.remove(key);
    }

    pub(crate) fn used(&self) -> i64 {
        self.inner.lock().evict.used()
    }

    pub(crate) fn max_cost(&self) -> i64 {
        self.inner.lock().evict.max_cost()
    }

    /// Replaces the cost budget.  No eviction happens here; the next
    /// admission normalizes.
    pub(crate) fn update_max_cost(&self, max_cost: i64) {
        self.inner.lock().evict.update_max_cost(max_cost);
    }

    /// Zeroes all frequency and cost state.  The budget is preserved.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.admit.clear();
        inner.evict.clear();
    }
}

impl PolicyInner {
    #[inline]
    fn record(&self, t: MetricType, hash: u64, delta: u64) {
        if let Some(m) = &self.metrics {
            m.add(t, hash, delta);
        }
    }

    fn add(&mut self, key: u64, cost: i64) -> (Vec<Victim>, bool) {
        // Record the candidate's sighting first: a fresh key then ties
        // with once-admitted residents instead of losing to them, and a
        // key that keeps coming back accumulates the frequency to win.
        self.admit.increment(key);

        // An item larger than the whole cache can never fit.
        if cost > self.evict.max_cost() {
            return (Vec::new(), false);
        }

        // Already resident: adjust the ledger in place.  Not an admission,
        // so the caller must not count it as one.
        if self.evict.update_if_present(key, cost) {
            return (Vec::new(), false);
        }

        let inc_hits = self.admit.estimate(key);
        let mut victims = Vec::new();
        while self.evict.room_left(cost) < 0 {
            let Some((victim_key, victim_cost, victim_hits)) =
                self.evict.sample_victim(&self.admit)
            else {
                // Ledger drained mid-loop; nothing left to displace.
                break;
            };
            if inc_hits < victim_hits {
                self.record(MetricType::SetsRejected, key, 1);
                return (victims, false);
            }
            self.evict.remove(victim_key);
            victims.push(Victim {
                key: victim_key,
                cost: victim_cost,
            });
        }

        self.evict.add(key, cost);
        self.record(MetricType::CostAdded, key, cost as u64);
        (victims, true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

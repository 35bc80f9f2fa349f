//! Sampled-LFU eviction ledger.
//!
//! The ledger is the policy's cost accounting: every admitted key hash and
//! its cost, the running `used` total, and the configured budget.  When an
//! admission needs room, victims are chosen by sampling: draw a handful
//! of resident keys uniformly, and offer up the coldest one.
//!
//! Entries live in an arena `Vec` with an index map beside it, so insert,
//! delete (swap-remove), and uniform sampling are all O(1).

use std::sync::Arc;

use ahash::AHashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::tinylfu::TinyLfu;
use crate::metrics::stats::{MetricType, Metrics};

/// Number of candidates drawn per eviction round.
pub(crate) const SAMPLE_SIZE: usize = 5;

struct LedgerEntry {
    key: u64,
    cost: i64,
}

pub(crate) struct SampledLfu {
    entries: Vec<LedgerEntry>,
    /// key hash → arena position.
    index: AHashMap<u64, usize>,
    used: i64,
    max_cost: i64,
    rng: SmallRng,
    metrics: Option<Arc<Metrics>>,
}

impl SampledLfu {
    pub(crate) fn new(max_cost: i64) -> Self {
        SampledLfu {
            entries: Vec::new(),
            index: AHashMap::new(),
            used: 0,
            max_cost,
            rng: SmallRng::from_entropy(),
            metrics: None,
        }
    }

    pub(crate) fn collect_metrics(&mut self, metrics: Arc<Metrics>) {
        self.metrics = Some(metrics);
    }

    #[inline]
    fn record(&self, t: MetricType, hash: u64, delta: u64) {
        if let Some(m) = &self.metrics {
            m.add(t, hash, delta);
        }
    }

    /// Budget remaining after a hypothetical admission of `cost`.
    /// Negative means victims must go first.
    #[inline]
    pub(crate) fn room_left(&self, cost: i64) -> i64 {
        self.max_cost - (self.used + cost)
    }

    pub(crate) fn max_cost(&self) -> i64 {
        self.max_cost
    }

    /// Replaces the budget without evicting; the next admission normalizes.
    pub(crate) fn update_max_cost(&mut self, max_cost: i64) {
        self.max_cost = max_cost;
    }

    pub(crate) fn used(&self) -> i64 {
        self.used
    }

    /// Inserts a fresh entry.  The caller has already made room.
    pub(crate) fn add(&mut self, key: u64, cost: i64) {
        self.index.insert(key, self.entries.len());
        self.entries.push(LedgerEntry { key, cost });
        self.used += cost;
    }

    /// Adjusts the cost of an already-admitted key.
    ///
    /// Updates never evict, so `used` may transiently exceed the budget;
    /// the next admission reclaims the space.
    pub(crate) fn update_if_present(&mut self, key: u64, cost: i64) -> bool {
        let Some(&pos) = self.index.get(&key) else {
            return false;
        };
        self.record(MetricType::KeysUpdated, key, 1);
        self.used += cost - self.entries[pos].cost;
        self.entries[pos].cost = cost;
        true
    }

    /// Removes `key` from the ledger, returning its cost.
    ///
    /// Records the eviction metrics for every removal, so explicit deletes
    /// count alongside policy victims.
    pub(crate) fn remove(&mut self, key: u64) -> Option<i64> {
        let pos = self.index.remove(&key)?;
        let entry = self.entries.swap_remove(pos);
        if let Some(moved) = self.entries.get(pos) {
            self.index.insert(moved.key, pos);
        }
        self.used -= entry.cost;
        self.record(MetricType::CostEvicted, key, entry.cost as u64);
        self.record(MetricType::KeysEvicted, key, 1);
        Some(entry.cost)
    }

    /// Draws [`SAMPLE_SIZE`] resident keys uniformly and returns the
    /// coldest: lowest estimated frequency, ties broken by lowest cost,
    /// then lowest key hash.  `None` when the ledger is empty.
    pub(crate) fn sample_victim(&mut self, admit: &TinyLfu) -> Option<(u64, i64, i64)> {
        if self.entries.is_empty() {
            return None;
        }
        let mut coldest: Option<(u64, i64, i64)> = None;
        for _ in 0..SAMPLE_SIZE.min(self.entries.len()) {
            let pick = &self.entries[self.rng.gen_range(0..self.entries.len())];
            let hits = admit.estimate(pick.key);
            let candidate = (pick.key, pick.cost, hits);
            coldest = Some(match coldest {
                None => candidate,
                Some(cur) => {
                    let (cur_key, cur_cost, cur_hits) = cur;
                    if (hits, pick.cost, pick.key) < (cur_hits, cur_cost, cur_key) {
                        candidate
                    } else {
                        cur
                    }
                }
            });
        }
        coldest
    }

    /// Drops every entry and resets `used`; the budget is preserved.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.used = 0;
    }
}

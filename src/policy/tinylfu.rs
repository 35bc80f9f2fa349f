//! TinyLFU admission filter: a count-min sketch fronted by a Bloom
//! doorkeeper, with periodic aging.
//!
//! The filter observes key hashes from two sources (read-ring drains and
//! Set events reaching the policy) and answers one question: roughly how
//! often has this key been touched lately?  "Lately" is enforced by the
//! sample epoch: after `num_counters` observations every sketch counter is
//! halved and the doorkeeper is flushed, so stale popularity decays.

use super::sketch::{Doorkeeper, FrequencySketch};

pub(crate) struct TinyLfu {
    freq: FrequencySketch,
    door: Doorkeeper,
    /// Samples observed since the last aging pass.
    samples: u64,
    /// Aging threshold, fixed at `num_counters`.
    reset_at: u64,
}

impl TinyLfu {
    pub(crate) fn new(num_counters: usize) -> Self {
        TinyLfu {
            freq: FrequencySketch::new(num_counters),
            door: Doorkeeper::new(num_counters),
            samples: 0,
            reset_at: num_counters as u64,
        }
    }

    /// Records one sighting of every hash in a drained read-ring batch.
    pub(crate) fn push(&mut self, hashes: &[u64]) {
        for &h in hashes {
            self.increment(h);
        }
    }

    /// Records one sighting of `hash`.
    ///
    /// First sighting in an epoch lands in the doorkeeper only; repeats
    /// reach the sketch.  Every sighting counts toward the aging epoch.
    pub(crate) fn increment(&mut self, hash: u64) {
        if !self.door.mark(hash) {
            self.freq.increment(hash);
        }
        self.samples += 1;
        if self.samples >= self.reset_at {
            self.age();
        }
    }

    /// Estimated frequency of `hash`.
    ///
    /// The doorkeeper holds the sighting the sketch hasn't seen yet, so a
    /// doorkeeper hit is worth one extra count.
    pub(crate) fn estimate(&self, hash: u64) -> i64 {
        let mut hits = i64::from(self.freq.estimate(hash));
        if self.door.contains(hash) {
            hits += 1;
        }
        hits
    }

    /// The aging pass: halve the sketch, flush the doorkeeper.
    fn age(&mut self) {
        self.samples = 0;
        self.freq.halve();
        self.door.clear();
    }

    /// Forgets all frequency state.
    pub(crate) fn clear(&mut self) {
        self.samples = 0;
        self.freq.clear();
        self.door.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sighting_lands_in_doorkeeper() {
        let mut lfu = TinyLfu::new(1024);
        lfu.increment(7);
        // Doorkeeper contributes exactly one count.
        assert_eq!(lfu.estimate(7), 1);
    }

    #[test]
    fn repeat_sightings_reach_the_sketch() {
        let mut lfu = TinyLfu::new(1024);
        for _ in 0..5 {
            lfu.increment(7);
        }
        // 1 doorkeeper count + 4 sketch counts.
        assert_eq!(lfu.estimate(7), 5);
    }

    #[test]
    fn unseen_key_estimates_zero() {
        let lfu = TinyLfu::new(1024);
        assert_eq!(lfu.estimate(99), 0);
    }

    #[test]
    fn push_counts_every_hash() {
        let mut lfu = TinyLfu::new(1024);
        lfu.push(&[1, 1, 1, 2]);
        assert_eq!(lfu.estimate(1), 3);
        assert_eq!(lfu.estimate(2), 1);
    }

    #[test]
    fn aging_halves_hot_keys() {
        // reset_at = 64 samples.
        let mut lfu = TinyLfu::new(64);
        for _ in 0..10 {
            lfu.increment(42);
        }
        let before = lfu.estimate(42);
        // Drive the epoch over with distinct keys.
        for i in 1_000u64..1_060 {
            lfu.increment(i);
        }
        let after = lfu.estimate(42);
        assert!(
            after < before,
            "aging should decay key 42: before={} after={}",
            before,
            after
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let mut lfu = TinyLfu::new(1024);
        for _ in 0..8 {
            lfu.increment(5);
        }
        lfu.clear();
        assert_eq!(lfu.estimate(5), 0);
    }
}

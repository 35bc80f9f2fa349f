//! Lossy read rings batching key hashes for the admission filter.
//!
//! Every `get` offers its key hash to a ring: one atomic increment plus
//! one atomic store, no lock.  The offer that lands in a ring's final
//! slot drains the whole ring and hands the batch back to the caller,
//! which forwards it to the policy's nonblocking push.  An offer against
//! a ring that is mid-drain is simply dropped: the frequency sketch is
//! approximate, and losing a read beats stalling one.
//!
//! ## Layout
//!
//! The pool holds [`NUM_RINGS`] independent rings; each calling thread is
//! pinned to one ring by a thread-local index, so unrelated threads don't
//! collide on the same slot counter.  Work-stealing runtimes that migrate
//! tasks across threads still work; the pinning is per OS thread and
//! only affects which ring absorbs the hash.
//!
//! ## Known race
//!
//! A writer claims a slot and stores the hash in two separate atomic
//! operations.  A drain that runs between the two reads the slot as 0
//! (the "empty" sentinel) and skips it; the sighting is lost.  The loss
//! is bounded to in-flight offers at the instant of the drain, which is
//! exactly the lossiness the read path is allowed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Rings in the pool.  Must be a power of two.
const NUM_RINGS: usize = 8;
const RING_MASK: usize = NUM_RINGS - 1;

/// Hands out a stable ring index per thread.
static RING_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_RING: usize = RING_COUNTER.fetch_add(1, Ordering::Relaxed) & RING_MASK;
}

/// Outcome of offering a hash to the pool.
pub(crate) enum Offer {
    /// The hash was recorded in a ring slot.
    Recorded,
    /// The ring was full mid-drain; the hash was discarded.
    Dropped,
    /// The hash was recorded *and* it filled the ring: the caller now owns
    /// the drained batch and must push it to the policy.
    Batch(Vec<u64>),
}

// ---------------------------------------------------------------------------
// Ring
// ---------------------------------------------------------------------------

/// One fixed-capacity ring.  Padded so neighbouring rings' counters don't
/// share a cache line.
#[repr(align(64))]
struct Ring {
    /// Hash slots.  0 is the sentinel for "not yet written".
    slots: Box<[AtomicU64]>,
    /// Claims made this cycle.  May overshoot the capacity under
    /// contention; overshooting claims are dropped.
    count: AtomicUsize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn offer(&self, hash: u64) -> Offer {
        let i = self.count.fetch_add(1, Ordering::Relaxed);
        if i >= self.slots.len() {
            return Offer::Dropped;
        }
        // Release pairs with the Acquire swap in `drain`, so a drain that
        // observes this claim also observes the stored hash.
        self.slots[i].store(hash, Ordering::Release);
        if i + 1 == self.slots.len() {
            Offer::Batch(self.drain())
        } else {
            Offer::Recorded
        }
    }

    /// Collects every recorded hash and resets the ring for the next
    /// cycle.  Called only by the thread whose offer filled the ring.
    fn drain(&self) -> Vec<u64> {
        let n = self.count.swap(0, Ordering::AcqRel).min(self.slots.len());
        let mut batch = Vec::with_capacity(n);
        for slot in &self.slots[..n] {
            // swap(0) clears the slot so a straggling writer that stores
            // after this point is picked up by the next cycle's drain.
            let h = slot.swap(0, Ordering::AcqRel);
            if h != 0 {
                batch.push(h);
            }
        }
        batch
    }
}

// ---------------------------------------------------------------------------
// ReadRings
// ---------------------------------------------------------------------------

/// The pool of read rings, one of which each thread offers into.
pub(crate) struct ReadRings {
    rings: Box<[Ring]>,
}

impl ReadRings {
    /// Creates a pool whose rings each hold `buffer_items` hashes.
    pub(crate) fn new(buffer_items: usize) -> Self {
        ReadRings {
            rings: (0..NUM_RINGS).map(|_| Ring::new(buffer_items)).collect(),
        }
    }

    /// Offers `hash` to the current thread's ring.  Never blocks.
    #[inline]
    pub(crate) fn offer(&self, hash: u64) -> Offer {
        let ring = THREAD_RING.with(|r| *r);
        self.rings[ring].offer(hash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

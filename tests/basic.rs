use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lungo::{Cache, CacheBuilder};

/// A small cache counting entries (cost 1 each, no internal overhead).
fn unit_cache(max_items: i64) -> Cache<String, String> {
    CacheBuilder::new(100, max_items)
        .ignore_internal_cost(true)
        .metrics(true)
        .build()
        .expect("valid config must build")
}

fn set1(cache: &Cache<String, String>, key: &str, value: &str) -> bool {
    cache.set_with_cost(&key.to_string(), value.to_string(), 1)
}

fn get(cache: &Cache<String, String>, key: &str) -> Option<Arc<String>> {
    cache.get(&key.to_string())
}

// ---------------------------------------------------------------------------
// Fundamental API correctness
// ---------------------------------------------------------------------------

#[test]
fn get_returns_none_on_miss() {
    let cache = unit_cache(10);
    assert_eq!(get(&cache, "missing"), None);
}

#[test]
fn set_wait_get_round_trip() {
    let cache = unit_cache(10);
    assert!(set1(&cache, "hello", "world"));
    cache.wait();
    assert_eq!(get(&cache, "hello").as_deref().map(String::as_str), Some("world"));
}

#[test]
fn delete_wait_get_misses() {
    let cache = unit_cache(10);
    set1(&cache, "k", "v");
    cache.wait();
    cache.delete(&"k".to_string());
    cache.wait();
    assert_eq!(get(&cache, "k"), None);
}

#[test]
fn update_replaces_value_in_place() {
    let cache = unit_cache(10);
    set1(&cache, "k", "v1");
    cache.wait();
    set1(&cache, "k", "v2");
    cache.wait();
    assert_eq!(get(&cache, "k").as_deref().map(String::as_str), Some("v2"));
    assert_eq!(cache.len(), 1, "update must not create a second entry");

    let metrics = cache.metrics().expect("metrics enabled");
    assert_eq!(metrics.keys_added(), 1);
    assert_eq!(metrics.keys_updated(), 1);
}

#[test]
fn cache_handles_are_cheap_clones_of_one_cache() {
    let c1 = unit_cache(10);
    let c2 = c1.clone();
    set1(&c1, "shared", "yes");
    c1.wait();
    assert!(get(&c2, "shared").is_some(), "cloned handle must see the same entries");
}

// ---------------------------------------------------------------------------
// Capacity and admission
// ---------------------------------------------------------------------------

#[test]
fn fill_plus_one_evicts_exactly_one() {
    let cache = unit_cache(10);
    let keys = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    for k in keys {
        assert!(set1(&cache, k, k));
    }
    cache.wait();
    for k in keys {
        assert!(get(&cache, k).is_some(), "key {k} missing before overflow");
    }

    assert!(set1(&cache, "k", "k"));
    cache.wait();

    assert_eq!(cache.len(), 10, "one in, one out");
    assert!(get(&cache, "k").is_some(), "fresh candidate must be admitted");
    let survivors = keys.iter().filter(|k| get(&cache, k).is_some()).count();
    assert_eq!(survivors, 9, "exactly one original key must be gone");
}

#[test]
fn used_capacity_never_exceeds_budget_after_wait() {
    let cache = unit_cache(2);
    set1(&cache, "a", "a");
    set1(&cache, "b", "b");
    cache.wait();
    assert_eq!(cache.used_capacity(), 2);

    // Either both residents are displaced and "c" lands, or "c" loses the
    // frequency duel; the budget holds either way.
    cache.set_with_cost(&"c".to_string(), "c".to_string(), 2);
    cache.wait();
    assert!(
        cache.used_capacity() <= cache.max_capacity(),
        "used {} exceeds max {}",
        cache.used_capacity(),
        cache.max_capacity()
    );
    if get(&cache, "c").is_some() {
        assert_eq!(get(&cache, "a"), None);
        assert_eq!(get(&cache, "b"), None);
    }
}

#[test]
fn oversized_item_is_rejected_with_callback() {
    let rejections = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&rejections);
    let cache: Cache<String, String> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .on_reject(move |_entry| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    assert!(
        cache.set_with_cost(&"huge".to_string(), "v".to_string(), 100),
        "reaching the buffer still reports true"
    );
    cache.wait();
    assert_eq!(get(&cache, "huge"), None);
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
}

#[test]
fn hot_items_survive_scan_pollution() {
    let cache: Cache<u64, u64> = CacheBuilder::new(1_000, 100)
        .ignore_internal_cost(true)
        .build()
        .unwrap();

    for i in 0..100u64 {
        cache.set_with_cost(&i, i, 1);
    }
    cache.wait();
    // Build frequency for 20 hot keys; enough reads to drain a ring into
    // the sketch several times.
    for _ in 0..30 {
        for i in 0..20u64 {
            cache.get(&i);
        }
    }

    // Scan: a flood of one-hit wonders.
    for i in 10_000..10_400u64 {
        cache.set_with_cost(&i, i, 1);
    }
    cache.wait();

    let survivors = (0..20u64).filter(|i| cache.get(i).is_some()).count();
    assert!(
        survivors >= 12,
        "only {survivors}/20 hot items survived the scan"
    );
    assert!(cache.len() as i64 <= 100);
}

#[test]
fn set_capacity_takes_effect_on_next_admission() {
    let cache = unit_cache(10);
    for k in ["a", "b", "c", "d", "e", "f"] {
        set1(&cache, k, k);
    }
    cache.wait();
    assert_eq!(cache.used_capacity(), 6);

    cache.set_capacity(3);
    assert_eq!(cache.max_capacity(), 3);
    // Shrinking alone evicts nothing.
    assert_eq!(cache.used_capacity(), 6);

    set1(&cache, "g", "g");
    cache.wait();
    assert!(
        cache.used_capacity() <= 3,
        "admission must normalize after a capacity cut: used {}",
        cache.used_capacity()
    );
}

// ---------------------------------------------------------------------------
// Cost accounting
// ---------------------------------------------------------------------------

#[test]
fn zero_cost_uses_lazy_cost_function() {
    let cache: Cache<String, String> = CacheBuilder::new(100, 1_000)
        .ignore_internal_cost(true)
        .cost(|v: &String| v.len() as i64)
        .build()
        .unwrap();

    cache.set(&"a".to_string(), "xxx".to_string());
    cache.wait();
    assert_eq!(cache.used_capacity(), 3, "cost must be computed from the value");
}

#[test]
fn internal_cost_is_added_by_default() {
    let cache: Cache<String, String> = CacheBuilder::new(100, 1_000_000).build().unwrap();
    cache.set_with_cost(&"a".to_string(), "v".to_string(), 1);
    cache.wait();
    assert!(
        cache.used_capacity() > 1,
        "per-entry overhead missing: used {}",
        cache.used_capacity()
    );
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
fn hits_and_misses_are_counted() {
    let cache = unit_cache(10);
    for _ in 0..10 {
        get(&cache, "missing");
    }
    assert_eq!(cache.misses(), 10);
    assert_eq!(cache.hits(), 0);

    set1(&cache, "x", "x");
    cache.wait();
    for _ in 0..10 {
        get(&cache, "x");
    }
    assert_eq!(cache.hits(), 10);
}

#[test]
fn disabled_metrics_read_zero() {
    let cache: Cache<String, String> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .build()
        .unwrap();
    get(&cache, "missing");
    assert!(cache.metrics().is_none());
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.misses(), 0);
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[test]
fn on_exit_fires_once_per_leaving_value() {
    let exits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&exits);
    let cache: Cache<String, String> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .on_exit(move |_value| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    cache.set_with_cost(&"a".to_string(), "v1".to_string(), 1);
    cache.wait();
    // Replacement releases v1.
    cache.set_with_cost(&"a".to_string(), "v2".to_string(), 1);
    cache.wait();
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    // Deletion releases v2.
    cache.delete(&"a".to_string());
    cache.wait();
    assert_eq!(exits.load(Ordering::SeqCst), 2);
}

#[test]
fn on_evict_sees_displaced_victims() {
    let evicted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&evicted);
    let cache: Cache<String, String> = CacheBuilder::new(100, 3)
        .ignore_internal_cost(true)
        .on_evict(move |entry| {
            assert!(entry.value.is_some(), "victim must carry its value");
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    for k in ["a", "b", "c", "d"] {
        cache.set_with_cost(&k.to_string(), k.to_string(), 1);
        cache.wait();
    }
    assert_eq!(evicted.load(Ordering::SeqCst), 1, "one overflow, one victim");
}

// ---------------------------------------------------------------------------
// Conflict hashes
// ---------------------------------------------------------------------------

#[test]
fn colliding_key_hashes_stay_isolated() {
    // Force every key onto one key hash; the conflict hash is the key
    // itself, so the two "keys" are distinguishable only by it.
    let cache: Cache<u64, u64> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .key_to_hash(|k: &u64| (1, *k))
        .build()
        .unwrap();

    cache.set_with_cost(&1, 100, 1);
    cache.wait();
    assert_eq!(cache.get(&1).as_deref(), Some(&100));

    // The colliding key misses: same key hash, wrong conflict hash.
    assert_eq!(cache.get(&2), None);

    // Deleting the colliding key must not disturb the resident one.
    cache.delete(&2);
    cache.wait();
    assert_eq!(cache.get(&1).as_deref(), Some(&100));

    // Writing the colliding key cannot clobber the resident value either.
    cache.set_with_cost(&2, 200, 1);
    cache.wait();
    assert_eq!(cache.get(&1).as_deref(), Some(&100));
    assert_eq!(cache.get(&2), None);
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

#[test]
fn for_each_visits_every_value_once() {
    let cache = unit_cache(10);
    for k in ["a", "b", "c"] {
        set1(&cache, k, k);
    }
    cache.wait();
    let mut seen = Vec::new();
    cache.for_each(|v| {
        seen.push(v.as_str().to_string());
        true
    });
    seen.sort();
    assert_eq!(seen, vec!["a", "b", "c"]);
}

#[test]
fn for_each_stops_when_told() {
    let cache = unit_cache(10);
    for k in ["a", "b", "c", "d", "e"] {
        set1(&cache, k, k);
    }
    cache.wait();
    let mut visited = 0;
    cache.for_each(|_| {
        visited += 1;
        visited < 2
    });
    assert_eq!(visited, 2);
}

// ---------------------------------------------------------------------------
// Clear and close
// ---------------------------------------------------------------------------

#[test]
fn clear_empties_cache_and_resets_metrics() {
    let cache = unit_cache(10);
    for k in ["a", "b", "c"] {
        set1(&cache, k, k);
    }
    cache.wait();
    get(&cache, "a");
    assert!(cache.hits() > 0);

    cache.clear();
    cache.wait();
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.used_capacity(), 0);
    assert_eq!(cache.hits(), 0, "metrics must reset with the cache");

    // The cache keeps working after a clear.
    set1(&cache, "again", "yes");
    cache.wait();
    assert!(get(&cache, "again").is_some());
}

#[test]
fn clear_releases_resident_values_through_callbacks() {
    let exits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&exits);
    let cache: Cache<String, String> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .on_exit(move |_value| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    for k in ["a", "b", "c"] {
        cache.set_with_cost(&k.to_string(), k.to_string(), 1);
    }
    cache.wait();
    cache.clear();
    assert_eq!(exits.load(Ordering::SeqCst), 3);
}

#[test]
fn close_is_idempotent_and_silences_operations() {
    let cache = unit_cache(10);
    set1(&cache, "k", "v");
    cache.wait();

    cache.close();
    cache.close(); // second close is a no-op

    assert_eq!(get(&cache, "k"), None);
    assert!(!set1(&cache, "x", "y"));
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.used_capacity(), 0);
    assert_eq!(cache.max_capacity(), 0);
    cache.delete(&"k".to_string());
    cache.wait();
    cache.clear();
}

// ---------------------------------------------------------------------------
// Time to live
// ---------------------------------------------------------------------------

#[test]
fn expired_entry_reads_as_miss() {
    let cache: Cache<String, String> = CacheBuilder::new(100, 10)
        .ignore_internal_cost(true)
        .time_to_live(Duration::from_millis(50))
        .build()
        .unwrap();

    cache.set_with_cost(&"k".to_string(), "v".to_string(), 1);
    cache.wait();
    assert!(get(&cache, "k").is_some(), "entry must be alive before its deadline");

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(get(&cache, "k"), None, "entry must expire");
    cache.wait();
    assert_eq!(cache.used_capacity(), 0, "expiry must release the cost");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_accounting_is_exact() {
    const GETTERS: u64 = 8;
    const GETS_PER_THREAD: u64 = 100_000;
    const KEY_SPACE: u64 = 1_000;

    let cache: Arc<Cache<u64, u64>> = Arc::new(
        CacheBuilder::new(10_000, 1_000)
            .ignore_internal_cost(true)
            .metrics(true)
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for t in 0..GETTERS {
        let c = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for j in 0..GETS_PER_THREAD {
                c.get(&((t.wrapping_mul(2_654_435_761).wrapping_add(j)) % KEY_SPACE));
            }
        }));
    }
    for t in 0..2u64 {
        let c = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for j in 0..20_000u64 {
                let k = (t.wrapping_mul(40_503).wrapping_add(j * 7)) % KEY_SPACE;
                c.set_with_cost(&k, k, 1);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    cache.wait();

    let total_gets = GETTERS * GETS_PER_THREAD;
    let m = cache.metrics().expect("metrics enabled");
    assert_eq!(m.hits() + m.misses(), total_gets, "every get is a hit or a miss");
    assert_eq!(
        m.gets_kept() + m.gets_dropped(),
        total_gets,
        "every get is kept or dropped"
    );
    assert!(
        cache.used_capacity() <= cache.max_capacity(),
        "budget must hold after quiescence"
    );
}

#[test]
fn concurrent_set_get_delete_is_safe() {
    let cache: Arc<Cache<String, String>> = Arc::new(
        CacheBuilder::new(10_000, 1_000)
            .ignore_internal_cost(true)
            .build()
            .unwrap(),
    );
    let mut handles = Vec::new();
    for t in 0..8 {
        let c = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for j in 0..2_000 {
                let key = format!("t{}-k{}", t, j % 64);
                c.set_with_cost(&key, key.clone(), 1);
                c.get(&key);
                if j % 16 == 0 {
                    c.delete(&key);
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    cache.wait();
    assert!(cache.len() as i64 <= 1_000);
}

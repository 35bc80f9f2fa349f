//! A fast, fixed-size, in-memory cache built for contended concurrent
//! access.
//!
//! Admission is decided by a TinyLFU filter (count-min sketch behind a
//! Bloom doorkeeper) and eviction by sampled LFU over a cost ledger.
//! Both are driven asynchronously: reads batch frequency sightings
//! through lossy rings, writes travel through a bounded event buffer,
//! and one background processor serializes all policy maintenance, so
//! the `get`/`set` fast paths never block on it.
//!
//! The cache is deliberately lossy: under extreme write pressure a `set`
//! may be dropped (reported by its `false` return), and frequency
//! sightings may be shed.  It is an optimization layer, not a source of
//! truth.
//!
//! # Example
//! ```
//! use lungo::CacheBuilder;
//!
//! let cache: lungo::Cache<String, String> = CacheBuilder::new(10_000, 100)
//!     .ignore_internal_cost(true)
//!     .build()
//!     .unwrap();
//!
//! cache.set_with_cost(&"answer".to_string(), "42".to_string(), 1);
//! cache.wait();
//! assert_eq!(*cache.get(&"answer".to_string()).unwrap(), "42");
//! ```

mod buffer;
mod builder;
mod cache;
mod error;
mod hash;
mod metrics;
mod policy;
mod store;

pub use builder::CacheBuilder;
pub use cache::{Cache, Entry};
pub use error::BuildError;
pub use hash::{DefaultKeyHasher, FnHasher, KeyHasher};
pub use metrics::stats::Metrics;

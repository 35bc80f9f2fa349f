use thiserror::Error;

/// Errors reported by [`CacheBuilder::build`](crate::CacheBuilder::build).
///
/// Construction is the only fallible operation: a running cache signals
/// capacity pressure through return values (`false` from `set`, metric
/// increments), never through errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// `num_counters` was zero. The admission sketch needs at least one
    /// counter to track access frequencies.
    #[error("num_counters must be greater than zero")]
    ZeroNumCounters,

    /// `max_cost` was zero. A cache with no cost budget could never admit
    /// an item.
    #[error("max_cost must be greater than zero")]
    ZeroMaxCost,

    /// `buffer_items` was zero. Read rings need at least one slot.
    #[error("buffer_items must be greater than zero")]
    ZeroBufferItems,
}

mod sharded;

pub(crate) use self::sharded::{SetOutcome, ShardedStore, StoreItem};

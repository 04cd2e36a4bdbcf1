use crate::cache::ShardedLRUCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use crate::sstable::block::Block;
use std::sync::Arc;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 20;
/// Generate a new filter every 2KB of data
pub const DEFAULT_FILTER_BASE_LG: u8 = 11;

/// Options controlling how tables are built and read.
#[derive(Clone)]
pub struct Options {
    /// Order of keys in tables. Tables must be read with the comparator they were built with.
    pub comparator: Arc<dyn Comparator>,

    /// If set, a filter block is built with this policy and consulted on reads.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Approximate size of user data packed per block.
    pub block_size: usize,

    /// Number of keys between restart points for delta encoding of keys.
    pub block_restart_interval: usize,

    /// Log2 of the data span covered by one filter.
    pub filter_base_lg: u8,

    /// Verify block checksums on every read.
    pub verify_checksums: bool,

    /// Cache of decoded data blocks shared by all tables opened with these options.
    pub block_cache: Option<Arc<ShardedLRUCache<Block>>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            filter_base_lg: DEFAULT_FILTER_BASE_LG,
            verify_checksums: true,
            block_cache: None,
        }
    }
}

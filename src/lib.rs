//! Storage engine core of an LSM database: arena-backed memtable, sorted string
//! tables with prefix-compressed blocks and bloom filters, and a sharded LRU cache.

#[macro_use]
extern crate log;

pub mod byteutils;
pub mod cache;
pub mod collections;
pub mod comparator;
pub mod crc;
pub mod env;
pub mod error;
pub mod filter;
pub mod hash;
pub mod iterator;
pub mod memory;
pub mod options;
pub mod sstable;

#[cfg(test)]
mod tests;

pub use cache::{CacheHandle, ShardedLRUCache};
pub use error::KVStoneError;
pub use memory::MemTable;
pub use options::Options;

pub type Result<T> = std::result::Result<T, error::KVStoneError>;

//! Memory table

pub mod key_types;
mod skip_map_mem_table;

pub use key_types::{Lookup, SequenceNumber, ValueType};
pub use skip_map_mem_table::{MemTable, MemTableIterator};

//! Sorted String Table, which is stored in disk.
//!
//! # SSTable
//!
//! A SSTable is stored in a file named "<number>.sst", where <number> is a zero-padded
//! decimal file number.
//!
//! ```text
//! +-------------------------+ (offset 0)
//! | Data Block 1            |<-+
//! +-------------------------+  |
//! | Data Block 2            |<-+
//! +-------------------------+  |
//! | ...                     |  |
//! +-------------------------+  |
//! | Data Block n            |<-+
//! +-------------------------+  |
//! | Filter Block            |<-+
//! +-------------------------+  |
//! | Index Block             |--+
//! +-------------------------+
//! | Footer                  |
//! +-------------------------+
//! ```
//!
//! Every block is followed by a 4-byte trailer holding the masked CRC32C of the block
//! contents extended with a single block type byte `0`.
//!
//! ## Block Entry
//!
//! ```text
//! +------------------------------------------------------------------+
//! | shared length | non-shared length | value length | key suffix | value |
//! +------------------------------------------------------------------+
//! \--------------/\-----------------/\-------------/\-----------/\------/
//!       u32               u32              u32        var-len    var-len
//! ```
//!
//! ## Data Block / Index Block
//!
//! ```text
//! +-------------------------------------------------------------------------+
//! | Entry 1 | Entry 2 | ... | Entry n | restart 1 | ... | restart m | m     |
//! +-------------------------------------------------------------------------+
//!                                     \----------------------------/\------/
//!                                              u32 each               u32
//! ```
//!
//! Index block values are encoded [format::BlockHandle]s, keyed by a separator that is
//! `>=` the last key of the data block and `<` the first key of the next one. The last
//! entry of the index block is keyed by [format::FILTER_HANDLE_KEY] and holds the filter
//! block handle, all zero if the table has no filter. It starts its own restart point
//! and readers strip it before searching the index.
//!
//! ## Filter Block
//!
//! ```text
//! +--------------------------------------------------------------------------+
//! | filter 1 | ... | filter n | offset 1 | ... | offset n | array offset | lg |
//! +--------------------------------------------------------------------------+
//!                             \--------------------------/\------------/\----/
//!                                       u32 each                u32       u8
//! ```
//!
//! Filter `i` covers the data blocks starting in `[i << lg, (i + 1) << lg)`.
//!
//! ## Footer
//!
//! Length of Footer is fixed (32 bytes), see [format::Footer].
//!
//! NOTE: All fixed-length integer are little-endian.

pub mod block;
pub mod block_builder;
pub mod filter_block;
pub mod format;
pub mod table;
pub mod table_builder;
pub mod table_cache;

pub use table::{Table, TableIter};
pub use table_builder::TableBuilder;
pub use table_cache::TableCache;

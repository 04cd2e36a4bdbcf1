use crate::byteutils::put_fixed64;
use crate::env::RandomAccessFile;
use crate::error::KVStoneError;
use crate::iterator::Cursor;
use crate::options::Options;
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{
    read_block, BlockHandle, Footer, FILTER_HANDLE_KEY, FOOTER_LENGTH,
};
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// A sorted map from keys to values, read from an immutable table file.
/// Safe for concurrent use.
pub struct Table {
    options: Options,
    file: Box<dyn RandomAccessFile>,
    /// Prefix of this table's keys in the block cache.
    cache_id: u64,
    filter: Option<FilterBlockReader>,
    index_block: Arc<Block>,
    /// Offset of the index block, the end of the data.
    index_offset: u64,
}

impl Table {
    /// Open the table stored in the first `size` bytes of `file`.
    pub fn open(options: Options, file: Box<dyn RandomAccessFile>, size: u64) -> Result<Table> {
        if size < FOOTER_LENGTH as u64 {
            return Err(KVStoneError::Corruption(
                "file is too short to be an sstable".into(),
            ));
        }

        let footer_offset = size - FOOTER_LENGTH as u64;
        let footer_data = file.read(footer_offset, FOOTER_LENGTH)?;
        let footer = Footer::decode(&footer_data)?;
        let index_handle = footer.index_handle;
        index_handle.check_within(footer_offset)?;

        let index_contents = read_block(&*file, options.verify_checksums, &index_handle)?;
        let (index_block, filter_key, filter_value) =
            Block::new(index_contents)?.split_trailing()?;
        if filter_key != FILTER_HANDLE_KEY {
            return Err(KVStoneError::Corruption(
                "index block lacks a filter handle".into(),
            ));
        }
        let filter_handle = BlockHandle::decode(&filter_value)?;

        let filter = match &options.filter_policy {
            Some(policy) if filter_handle != BlockHandle::default() => {
                match filter_handle
                    .check_within(index_handle.offset)
                    .and_then(|_| read_block(&*file, options.verify_checksums, &filter_handle))
                {
                    Ok(contents) => Some(FilterBlockReader::new(policy.clone(), contents)),
                    // A table is still readable without its filter
                    Err(e) => {
                        warn!("ignoring unreadable filter block {:?}: {}", filter_handle, e);
                        None
                    }
                }
            }
            _ => None,
        };

        let cache_id = options.block_cache.as_ref().map_or(0, |c| c.new_id());
        Ok(Table {
            options,
            file,
            cache_id,
            filter,
            index_block: Arc::new(index_block),
            index_offset: index_handle.offset,
        })
    }

    /// Value stored under exactly `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.find(key)?.and_then(|(k, v)| {
            if self.options.comparator.compare(&k, key) == Ordering::Equal {
                Some(v)
            } else {
                None
            }
        }))
    }

    /// First entry at or after `key` inside the data block that may contain `key`.
    ///
    /// `None` if that block holds no such entry or the filter rules `key` out, so with a
    /// filter policy a key that was never added usually yields `None` even when later
    /// entries exist. Use [Table::iter] to scan from an arbitrary key. Callers looking up
    /// internal keys compare the user key of the result.
    pub fn find(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_iter();
        index_iter.seek(key);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(None);
        }

        let handle = BlockHandle::decode(index_iter.value())?;
        if let Some(filter) = &self.filter {
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }

        let mut block_iter = self
            .read_data_block(&handle)?
            .iter(self.options.comparator.clone());
        block_iter.seek(key);
        if block_iter.valid() {
            return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
        }
        block_iter.status()?;
        Ok(None)
    }

    /// Approximate file offset where the data for `key` begins, or would begin.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_iter();
        index_iter.seek(key);
        if index_iter.valid() {
            if let Ok(handle) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        // Key is past the last key in the file, or the index entry is malformed.
        // The data ends where the index starts.
        self.index_offset
    }

    /// Cursor over every entry of the table.
    pub fn iter(self: Arc<Self>) -> TableIter {
        let index_iter = self.index_iter();
        TableIter {
            table: self,
            index_iter,
            data_iter: None,
            data_block_handle: vec![],
            status: Ok(()),
        }
    }

    fn index_iter(&self) -> BlockIter {
        self.index_block
            .clone()
            .iter(self.options.comparator.clone())
    }

    /// Load a data block, going through the block cache when one is configured.
    fn read_data_block(&self, handle: &BlockHandle) -> Result<Arc<Block>> {
        handle.check_within(self.index_offset)?;
        let cache = match &self.options.block_cache {
            Some(cache) => cache,
            None => {
                let contents = read_block(&*self.file, self.options.verify_checksums, handle)?;
                return Ok(Arc::new(Block::new(contents)?));
            }
        };

        let mut cache_key = Vec::with_capacity(16);
        put_fixed64(&mut cache_key, self.cache_id);
        put_fixed64(&mut cache_key, handle.offset);
        if let Some(h) = cache.lookup(&cache_key) {
            return Ok(h.value());
        }
        let contents = read_block(&*self.file, self.options.verify_checksums, handle)?;
        let block = Block::new(contents)?;
        let charge = block.size();
        Ok(cache.insert(&cache_key, block, charge, None).value())
    }
}

/// Two-level cursor: an index block cursor selecting data blocks, and a cursor over
/// the selected data block.
pub struct TableIter {
    table: Arc<Table>,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    /// Encoded handle of the block under `data_iter`.
    data_block_handle: Vec<u8>,
    status: Result<()>,
}

impl TableIter {
    fn save_error(&mut self, result: Result<()>) {
        if self.status.is_ok() && result.is_err() {
            self.status = result;
        }
    }

    fn set_data_iter(&mut self, data_iter: Option<BlockIter>) {
        if let Some(old) = self.data_iter.take() {
            self.save_error(old.status());
        }
        self.data_iter = data_iter;
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iter(None);
            return;
        }
        let handle_value = self.index_iter.value();
        if self.data_iter.is_some() && handle_value == self.data_block_handle.as_slice() {
            // data_iter is already constructed with this block
            return;
        }
        let block = BlockHandle::decode(handle_value)
            .and_then(|handle| self.table.read_data_block(&handle));
        match block {
            Ok(block) => {
                self.data_block_handle = handle_value.to_vec();
                let iter = block.iter(self.table.options.comparator.clone());
                self.set_data_iter(Some(iter));
            }
            Err(e) => {
                self.set_data_iter(None);
                self.save_error(Err(e));
            }
        }
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |d| d.valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_valid() {
            // Move to next block
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(d) = self.data_iter.as_mut() {
                d.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_valid() {
            // Move to previous block
            if !self.index_iter.valid() {
                self.set_data_iter(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(d) = self.data_iter.as_mut() {
                d.seek_to_last();
            }
        }
    }
}

impl Cursor for TableIter {
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(d) = self.data_iter.as_mut() {
            d.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(d) = self.data_iter.as_mut() {
            d.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(d) = self.data_iter.as_mut() {
            d.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(d) = self.data_iter.as_mut() {
            d.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(d) = self.data_iter.as_mut() {
            d.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        match &self.data_iter {
            Some(d) => d.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.data_iter {
            Some(d) => d.value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(d) = &self.data_iter {
            d.status()?;
        }
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::ShardedLRUCache;
    use crate::comparator::{BytewiseComparator, Comparator};
    use crate::filter::BloomFilterPolicy;
    use crate::iterator::Cursor;
    use crate::options::Options;
    use crate::sstable::block_builder::BlockBuilder;
    use crate::sstable::format::{
        write_block, BlockHandle, Footer, BLOCK_HANDLE_LENGTH, FOOTER_LENGTH,
    };
    use crate::sstable::table::Table;
    use crate::sstable::table_builder::TableBuilder;
    use crate::tests::{init_logger, random_kvs, sequential_kvs, MemFile, MemWritableFile};
    use std::sync::Arc;

    fn build_table(options: &Options, kvs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut builder = TableBuilder::new(options.clone(), MemWritableFile::default());
        for (k, v) in kvs {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap();
        let size = builder.file_size();
        let contents = builder.into_file().contents();
        assert_eq!(contents.len() as u64, size);
        contents
    }

    fn open(options: &Options, contents: Vec<u8>) -> Arc<Table> {
        let size = contents.len() as u64;
        Arc::new(Table::open(options.clone(), Box::new(MemFile::new(contents)), size).unwrap())
    }

    fn small_block_options() -> Options {
        Options {
            block_size: 256,
            block_restart_interval: 4,
            ..Options::default()
        }
    }

    #[test]
    fn test_iterate_all_entries() {
        init_logger();
        let options = small_block_options();
        let kvs = sequential_kvs(1000);
        let table = open(&options, build_table(&options, &kvs));

        let mut iter = table.clone().iter();
        iter.seek_to_first();
        for (k, v) in &kvs {
            assert!(iter.valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), v.as_slice());
            iter.next();
        }
        assert!(!iter.valid());

        iter.seek_to_last();
        for (k, _) in kvs.iter().rev() {
            assert_eq!(iter.key(), k.as_slice());
            iter.prev();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());

        iter.seek(&kvs[500].0);
        assert_eq!(iter.key(), kvs[500].0.as_slice());
        let mut after = kvs[700].0.clone();
        after.push(0);
        iter.seek(&after);
        assert_eq!(iter.key(), kvs[701].0.as_slice());
    }

    #[test]
    fn test_get() {
        let options = Options {
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            ..small_block_options()
        };
        let kvs = sequential_kvs(500);
        let table = open(&options, build_table(&options, &kvs));
        for (k, v) in &kvs {
            assert_eq!(table.get(k).unwrap().as_ref(), Some(v));
        }
        assert_eq!(table.get(b"").unwrap(), None);
        assert_eq!(table.get(b"key-missing").unwrap(), None);
        assert_eq!(table.get(b"zzz").unwrap(), None);

        // the filter rules out keys that were never added
        assert_eq!(table.find(b"key000100\x00").unwrap(), None);

        let unfiltered = Options {
            filter_policy: None,
            ..options
        };
        let table = open(&unfiltered, build_table(&unfiltered, &kvs));
        let (k, _) = table.find(b"key000100\x00").unwrap().unwrap();
        assert_eq!(k, kvs[101].0);
        assert_eq!(table.get(b"key000100\x00").unwrap(), None);
    }

    #[test]
    fn test_random_round_trip() {
        for (seed, restart_interval, block_size) in [(1, 1, 64), (2, 16, 1024), (3, 20, 4096)] {
            let options = Options {
                block_restart_interval: restart_interval,
                block_size,
                filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
                ..Options::default()
            };
            let kvs = random_kvs(2000, seed);
            let table = open(&options, build_table(&options, &kvs));
            let mut iter = table.clone().iter();
            iter.seek_to_first();
            for (k, v) in &kvs {
                assert_eq!(iter.key(), k.as_slice());
                assert_eq!(iter.value(), v.as_slice());
                iter.next();
            }
            assert!(!iter.valid());
            for (k, v) in kvs.iter().step_by(7) {
                assert_eq!(table.get(k).unwrap().as_ref(), Some(v));
            }
        }
    }

    #[test]
    fn test_approximate_offsets() {
        let options = small_block_options();
        let kvs = sequential_kvs(1000);
        let contents = build_table(&options, &kvs);
        let size = contents.len() as u64;
        let table = open(&options, contents);
        assert_eq!(table.approximate_offset_of(b""), 0);
        let middle = table.approximate_offset_of(&kvs[500].0);
        assert!(middle > size / 4 && middle < size, "{}", middle);
        let end = table.approximate_offset_of(b"zzz");
        assert!(end > middle && end < size);
    }

    #[test]
    fn test_block_cache() {
        let cache = Arc::new(ShardedLRUCache::new(1 << 20));
        let options = Options {
            block_cache: Some(cache.clone()),
            ..small_block_options()
        };
        let kvs = sequential_kvs(200);
        let t1 = open(&options, build_table(&options, &kvs));
        let t2 = open(&options, build_table(&options, &kvs));
        assert_eq!(cache.total_charge(), 0);

        assert!(t1.get(&kvs[0].0).unwrap().is_some());
        let charge = cache.total_charge();
        assert!(charge > 0);
        // cached block is reused
        assert!(t1.get(&kvs[1].0).unwrap().is_some());
        assert_eq!(cache.total_charge(), charge);
        // each table has its own key space in the cache
        assert!(t2.get(&kvs[0].0).unwrap().is_some());
        assert_eq!(cache.total_charge(), 2 * charge);
    }

    #[test]
    fn test_corruption() {
        let options = small_block_options();
        let kvs = sequential_kvs(100);
        let contents = build_table(&options, &kvs);

        let mut bad_data = contents.clone();
        bad_data[10] ^= 0x01;
        let table = open(&options, bad_data);
        assert!(table.get(&kvs[0].0).unwrap_err().is_corruption());
        let mut iter = table.clone().iter();
        iter.seek_to_first();
        // the corrupt first block is skipped but reported
        assert!(iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());

        let mut bad_magic = contents.clone();
        let n = bad_magic.len();
        bad_magic[n - 1] ^= 0x01;
        let size = n as u64;
        let result = Table::open(options.clone(), Box::new(MemFile::new(bad_magic)), size);
        assert!(result.err().unwrap().is_corruption());

        let result = Table::open(options.clone(), Box::new(MemFile::new(vec![0; 10])), 10);
        assert!(result.err().unwrap().is_corruption());

        // footer points past a truncated file
        let truncated: Vec<u8> = contents[contents.len() - FOOTER_LENGTH..].to_vec();
        let size = FOOTER_LENGTH as u64;
        let result = Table::open(options, Box::new(MemFile::new(truncated)), size);
        assert!(result.err().unwrap().is_corruption());
    }

    #[test]
    fn test_corrupted_index_handle() {
        let options = Options {
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            ..small_block_options()
        };
        let contents = build_table(&options, &sequential_kvs(100));
        let handle_start = contents.len() - FOOTER_LENGTH;
        for i in handle_start..handle_start + BLOCK_HANDLE_LENGTH {
            for mask in [0x01, 0x40, 0xff] {
                let mut bad = contents.clone();
                bad[i] ^= mask;
                let size = bad.len() as u64;
                let result = Table::open(options.clone(), Box::new(MemFile::new(bad)), size);
                assert!(result.err().unwrap().is_corruption(), "byte {} ^ {}", i, mask);
            }
        }
    }

    #[test]
    fn test_index_without_filter_handle() {
        // a bare index block followed by a footer pointing at it
        let mut file = MemWritableFile::default();
        let mut offset = 0;
        let mut index = BlockBuilder::new(1, Arc::new(BytewiseComparator));
        index.add(b"k", &BlockHandle::new(0, 0).encode());
        let index_handle = write_block(&mut file, index.finish(), &mut offset).unwrap();
        let mut contents = file.contents();
        Footer { index_handle }.encode_to(&mut contents);
        let size = contents.len() as u64;
        let options = Options::default();
        let result = Table::open(options, Box::new(MemFile::new(contents)), size);
        assert!(result.err().unwrap().is_corruption());
    }

    #[test]
    fn test_custom_comparator() {
        struct ReverseComparator;
        impl Comparator for ReverseComparator {
            fn name(&self) -> &'static str {
                "test.ReverseComparator"
            }
            fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
                b.cmp(a)
            }
            fn find_shortest_separator(&self, _start: &mut Vec<u8>, _limit: &[u8]) {}
            fn find_short_successor(&self, _key: &mut Vec<u8>) {}
        }

        let options = Options {
            comparator: Arc::new(ReverseComparator),
            ..small_block_options()
        };
        let mut kvs = sequential_kvs(300);
        kvs.reverse();
        let table = open(&options, build_table(&options, &kvs));
        let mut iter = table.clone().iter();
        iter.seek_to_first();
        assert_eq!(iter.key(), kvs[0].0.as_slice());
        for (k, v) in &kvs {
            assert_eq!(table.get(k).unwrap().as_ref(), Some(v));
        }
    }
}

use crate::env::WritableFile;
use crate::error::KVStoneError;
use crate::options::Options;
use crate::sstable::block_builder::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{
    write_block, BlockHandle, Footer, FILTER_HANDLE_KEY, FOOTER_LENGTH,
};
use crate::Result;
use std::cmp::Ordering;

/// Writes a sorted sequence of entries as a table file.
///
/// The builder does not sync or close the file; take it back with
/// [TableBuilder::into_file] once [TableBuilder::finish] succeeds.
pub struct TableBuilder<W: WritableFile> {
    options: Options,
    file: W,
    offset: u64,
    /// First error hit while writing. Every later operation returns it.
    status: Result<()>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    num_entries: u64,
    /// Either `finish()` or `abandon()` has been called.
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    /// The index entry for a block is added when the first key of the next block is
    /// seen, which allows a shorter separator key in the index: "the r" can separate
    /// "the quick brown fox" and "the who".
    pending_index_entry: bool,
    /// Handle to add to the index block.
    pending_handle: BlockHandle,
}

impl<W: WritableFile> TableBuilder<W> {
    pub fn new(options: Options, file: W) -> TableBuilder<W> {
        let data_block =
            BlockBuilder::new(options.block_restart_interval, options.comparator.clone());
        let index_block = BlockBuilder::new(1, options.comparator.clone());
        let mut filter_block = options
            .filter_policy
            .as_ref()
            .map(|p| FilterBlockBuilder::new(p.clone(), options.filter_base_lg));
        if let Some(f) = filter_block.as_mut() {
            f.start_block(0);
        }
        TableBuilder {
            options,
            file,
            offset: 0,
            status: Ok(()),
            data_block,
            index_block,
            last_key: vec![],
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        }
    }

    /// Add `key`, `value` to the table being constructed.
    ///
    /// `key` must be after any previously added key according to the comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(KVStoneError::InvalidArgument(
                "keys must be added in strictly increasing order".into(),
            ));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            self.index_block
                .add(&self.last_key, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }

        if let Some(f) = self.filter_block.as_mut() {
            f.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the buffered entries as a data block. Most clients should not need to
    /// call this; blocks are flushed once they reach `Options::block_size`.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let result = self.write_data_block().and_then(|_| self.file.flush());
        self.record(result)?;
        self.pending_index_entry = true;
        if let Some(f) = self.filter_block.as_mut() {
            f.start_block(self.offset);
        }
        debug!(
            "flushed data block {:?}, file size {}",
            self.pending_handle, self.offset
        );
        Ok(())
    }

    /// Finish building the table. Stops using the file after this returns.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        let result = self.write_meta_blocks();
        self.record(result)?;
        info!(
            "table finished: {} entries, {} bytes",
            self.num_entries, self.offset
        );
        Ok(())
    }

    /// Indicate that the contents of this builder should be abandoned.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file generated so far. After a successful `finish()`, the size of
    /// the final file.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    pub fn into_file(self) -> W {
        self.file
    }

    fn check_open(&self) -> Result<()> {
        self.status.clone()?;
        if self.closed {
            return Err(KVStoneError::InvalidArgument(
                "table builder is closed".into(),
            ));
        }
        Ok(())
    }

    fn record(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            self.status = Err(e.clone());
        }
        result
    }

    fn write_data_block(&mut self) -> Result<()> {
        let contents = self.data_block.finish();
        self.pending_handle = write_block(&mut self.file, contents, &mut self.offset)?;
        self.data_block.reset();
        Ok(())
    }

    fn write_meta_blocks(&mut self) -> Result<()> {
        let filter_handle = match self.filter_block.as_mut() {
            Some(f) => write_block(&mut self.file, f.finish(), &mut self.offset)?,
            None => BlockHandle::default(),
        };

        if self.pending_index_entry {
            self.options
                .comparator
                .find_short_successor(&mut self.last_key);
            self.index_block
                .add(&self.last_key, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }
        self.index_block
            .add_trailing(FILTER_HANDLE_KEY, &filter_handle.encode());
        let index_handle = write_block(
            &mut self.file,
            self.index_block.finish(),
            &mut self.offset,
        )?;

        let mut footer = Vec::with_capacity(FOOTER_LENGTH);
        Footer { index_handle }.encode_to(&mut footer);
        self.file.append(&footer)?;
        self.offset += footer.len() as u64;
        self.file.flush()
    }
}

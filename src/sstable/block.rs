use crate::byteutils::{decode_fixed32, put_fixed32};
use crate::comparator::Comparator;
use crate::error::KVStoneError;
use crate::iterator::Cursor;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// An immutable block of prefix-compressed entries produced by
/// [`BlockBuilder`](crate::sstable::block_builder::BlockBuilder).
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validates the restart array of `contents`.
    pub fn new(contents: Vec<u8>) -> Result<Block> {
        if contents.len() < U32_SIZE {
            return Err(KVStoneError::Corruption("block too short".into()));
        }
        let num_restarts = decode_fixed32(&contents[contents.len() - U32_SIZE..]) as usize;
        let max_restarts_allowed = (contents.len() - U32_SIZE) / U32_SIZE;
        if num_restarts > max_restarts_allowed {
            return Err(KVStoneError::Corruption(
                "bad block contents: restart array overflows".into(),
            ));
        }
        let restart_offset = contents.len() - (1 + num_restarts) * U32_SIZE;
        Ok(Block {
            data: contents,
            restart_offset,
            num_restarts,
        })
    }

    /// Split off the entry written by
    /// [`BlockBuilder::add_trailing`](crate::sstable::block_builder::BlockBuilder::add_trailing),
    /// returning the remaining block with its key and value.
    pub fn split_trailing(self) -> Result<(Block, Vec<u8>, Vec<u8>)> {
        let bad = || KVStoneError::Corruption("block has no trailing entry".into());
        if self.num_restarts == 0 {
            return Err(bad());
        }
        let last = self.restart_point(self.num_restarts - 1);
        let (key_offset, non_shared, value_len) =
            match self.decode_entry(last, self.restart_offset) {
                Some((0, non_shared, value_len, key_offset))
                    if key_offset + non_shared + value_len == self.restart_offset =>
                {
                    (key_offset, non_shared, value_len)
                }
                _ => return Err(bad()),
            };
        let key = self.data[key_offset..key_offset + non_shared].to_vec();
        let value_offset = key_offset + non_shared;
        let value = self.data[value_offset..value_offset + value_len].to_vec();

        let num_restarts = self.num_restarts - 1;
        let mut data = self.data;
        let restarts_start = self.restart_offset;
        let restarts_end = restarts_start + num_restarts * U32_SIZE;
        data.copy_within(restarts_start..restarts_end, last);
        data.truncate(last + num_restarts * U32_SIZE);
        put_fixed32(&mut data, num_restarts as u32);
        Ok((Block::new(data)?, key, value))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: Arc<Self>, comparator: Arc<dyn Comparator>) -> BlockIter {
        let restarts = self.restart_offset;
        let num_restarts = self.num_restarts;
        BlockIter {
            block: self,
            comparator,
            restarts,
            num_restarts,
            current: restarts,
            restart_index: num_restarts,
            key: vec![],
            value_offset: restarts,
            value_len: 0,
            status: Ok(()),
        }
    }

    #[inline]
    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + index * U32_SIZE..]) as usize
    }

    /// Decode the entry header at `offset`, returning `(shared, non_shared, value_len,
    /// key suffix offset)`, or `None` if the entry does not fit before `limit`.
    fn decode_entry(&self, offset: usize, limit: usize) -> Option<(usize, usize, usize, usize)> {
        if limit < offset || limit - offset < 3 * U32_SIZE {
            return None;
        }
        let shared = decode_fixed32(&self.data[offset..]) as usize;
        let non_shared = decode_fixed32(&self.data[offset + U32_SIZE..]) as usize;
        let value_len = decode_fixed32(&self.data[offset + 2 * U32_SIZE..]) as usize;
        let key_offset = offset + 3 * U32_SIZE;
        if non_shared.checked_add(value_len)? > limit - key_offset {
            return None;
        }
        Some((shared, non_shared, value_len, key_offset))
    }
}

/// Cursor over the entries of a [`Block`].
pub struct BlockIter {
    block: Arc<Block>,
    comparator: Arc<dyn Comparator>,
    /// Offset of the restart array; also the end of the entries.
    restarts: usize,
    num_restarts: usize,
    /// Offset of the current entry, `>= restarts` if not valid.
    current: usize,
    /// Index of the restart block in which `current` falls.
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Result<()>,
}

impl BlockIter {
    #[inline]
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn mark_invalid(&mut self) {
        self.current = self.restarts;
        self.restart_index = self.num_restarts;
    }

    fn corruption_error(&mut self) {
        warn!("bad entry in block at offset {}", self.current);
        self.mark_invalid();
        self.status = Err(KVStoneError::Corruption("bad entry in block".into()));
        self.key.clear();
        self.value_offset = self.restarts;
        self.value_len = 0;
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_key() starts at the end of the current value
        self.value_offset = self.block.restart_point(index);
        self.value_len = 0;
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.restarts {
            self.mark_invalid();
            return false;
        }

        match self.block.decode_entry(self.current, self.restarts) {
            Some((shared, non_shared, value_len, key_offset)) if self.key.len() >= shared => {
                self.key.truncate(shared);
                self.key
                    .extend_from_slice(&self.block.data[key_offset..key_offset + non_shared]);
                self.value_offset = key_offset + non_shared;
                self.value_len = value_len;
                while self.restart_index + 1 < self.num_restarts
                    && self.block.restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_error();
                false
            }
        }
    }
}

impl Cursor for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.restarts
    }

    fn seek_to_first(&mut self) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.restarts {
            // keep skipping
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }

        // Binary search in restart array to find the last restart point
        // with a key < target
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid);
            let mid_key = match self.block.decode_entry(region_offset, self.restarts) {
                Some((0, non_shared, _, key_offset)) => {
                    &self.block.data[key_offset..key_offset + non_shared]
                }
                _ => {
                    self.current = region_offset;
                    self.corruption_error();
                    return;
                }
            };
            if self.comparator.compare(mid_key, target) == Ordering::Less {
                // Key at "mid" is smaller than "target". Therefore all
                // blocks before "mid" are uninteresting.
                left = mid;
            } else {
                // Key at "mid" is >= "target". Therefore all blocks at or
                // after "mid" are uninteresting.
                right = mid - 1;
            }
        }

        // Linear search (within restart block) for first key >= target
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());

        // Scan backwards to a restart point before current
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No more entries
                self.mark_invalid();
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        // Loop until end of current entry hits the start of original entry
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

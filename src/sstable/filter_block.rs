use crate::byteutils::{decode_fixed32, put_fixed32};
use crate::filter::FilterPolicy;
use std::sync::Arc;

/// Builds all of the filters of a table, stored as a single block at the end of
/// the file. One filter covers every data block starting in the same
/// `1 << base_lg` byte span.
///
/// Calls must match the regexp `(start_block add_key*)* finish`.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    base_lg: u8,
    /// Flattened key contents of the current filter.
    keys: Vec<u8>,
    /// Starting index in `keys` of each key.
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>, base_lg: u8) -> FilterBlockBuilder {
        assert!(base_lg < 64);
        FilterBlockBuilder {
            policy,
            base_lg,
            keys: vec![],
            starts: vec![],
            result: vec![],
            filter_offsets: vec![],
        }
    }

    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> self.base_lg;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Emit the remaining filter and the offset array.
    pub fn finish(&mut self) -> &[u8] {
        if !self.starts.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        for i in 0..self.filter_offsets.len() {
            put_fixed32(&mut self.result, self.filter_offsets[i]);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(self.base_lg);
        &self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            // Fast path if there are no keys for this filter
            return;
        }

        self.starts.push(self.keys.len());
        let key_data = &self.keys;
        let keys: Vec<&[u8]> = self
            .starts
            .windows(2)
            .map(|w| &key_data[w[0]..w[1]])
            .collect();
        self.policy.create_filter(&keys, &mut self.result);

        self.keys.clear();
        self.starts.clear();
    }
}

/// Answers filter queries against a block built by [`FilterBlockBuilder`].
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Offset of the beginning of the offset array.
    offset: usize,
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> FilterBlockReader {
        let mut reader = FilterBlockReader {
            policy,
            data: vec![],
            offset: 0,
            num: 0,
            base_lg: 0,
        };
        let n = contents.len();
        // 1 byte for base_lg and 4 for start of offset array
        if n < 5 {
            return reader;
        }
        let last_word = decode_fixed32(&contents[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = contents[n - 1];
        reader.offset = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader.data = contents;
        reader
    }

    /// Whether `key` may be present in the data block starting at `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = block_offset.checked_shr(self.base_lg as u32).unwrap_or(0) as usize;
        if index < self.num {
            let pos = self.offset + index * 4;
            let start = decode_fixed32(&self.data[pos..]) as usize;
            let limit = decode_fixed32(&self.data[pos + 4..]) as usize;
            if start <= limit && limit <= self.offset {
                return self.policy.key_may_match(key, &self.data[start..limit]);
            } else if start == limit {
                // Empty filters do not match any keys
                return false;
            }
        }
        // Errors are treated as potential matches
        true
    }
}

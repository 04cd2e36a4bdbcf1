use crate::byteutils::put_fixed32;
use crate::comparator::Comparator;
use std::cmp::Ordering;
use std::sync::Arc;

/// Builds a block of prefix-compressed entries.
///
/// Every `restart_interval` entries the key is stored in full and its offset is
/// recorded as a restart point, so readers can binary search the block.
pub struct BlockBuilder {
    restart_interval: usize,
    comparator: Arc<dyn Comparator>,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries emitted since the last restart.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, comparator: Arc<dyn Comparator>) -> BlockBuilder {
        assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            comparator,
            buffer: vec![],
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: vec![],
        }
    }

    /// Reset the contents as if the builder was just constructed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// REQUIRES: `finish()` has not been called since the last `reset()`.
    /// REQUIRES: `key` is larger than any previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);
        debug_assert!(
            self.buffer.is_empty()
                || self.comparator.compare(key, &self.last_key) == Ordering::Greater
        );

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_fixed32(&mut self.buffer, shared as u32);
        put_fixed32(&mut self.buffer, non_shared as u32);
        put_fixed32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key.as_slice(), key);
        self.counter += 1;
    }

    /// Add an entry that is exempt from key ordering. It starts its own restart point
    /// and nothing may be added after it.
    pub fn add_trailing(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        if !self.buffer.is_empty() {
            self.restarts.push(self.buffer.len() as u32);
        }
        self.counter = self.restart_interval;
        put_fixed32(&mut self.buffer, 0);
        put_fixed32(&mut self.buffer, key.len() as u32);
        put_fixed32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(key);
        self.buffer.extend_from_slice(value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
    }

    /// Append the restart array and return the block contents, valid until `reset()`.
    pub fn finish(&mut self) -> &[u8] {
        debug_assert!(!self.finished);
        for i in 0..self.restarts.len() {
            put_fixed32(&mut self.buffer, self.restarts[i]);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Size of the block `finish()` would produce now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

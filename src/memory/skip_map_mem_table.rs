use crate::byteutils::{decode_fixed32, decode_fixed64, encode_fixed32, encode_fixed64};
use crate::collections::skip_list::arena::{Arena, MemoryUsage};
use crate::collections::skip_list::skiplist::{NodeId, SkipList};
use crate::collections::skip_list::{KeyComparator, SkipListOptions};
use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::KVStoneError;
use crate::iterator::Cursor;
use crate::memory::key_types::{
    pack_sequence_and_type, InternalKeyComparator, Lookup, SequenceNumber, ValueType,
    MAX_SEQUENCE_NUMBER, TAG_SIZE, VALUE_TYPE_FOR_SEEK,
};
use crate::Result;
use std::cmp::Ordering;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Pointer to one encoded entry:
/// `[klen: u32][user key][tag: u64][vlen: u32][value]`.
///
/// Entries written by [`MemTable::add`] point into the memtable's arena; lookup
/// probes point into a temporary buffer that outlives the search.
#[derive(Clone, Copy)]
struct EntryRef {
    ptr: *const u8,
    len: usize,
}

unsafe impl Send for EntryRef {}
unsafe impl Sync for EntryRef {}

impl Default for EntryRef {
    fn default() -> Self {
        EntryRef {
            ptr: std::ptr::null(),
            len: 0,
        }
    }
}

impl EntryRef {
    fn encoded_len(key: &[u8], value: &[u8]) -> usize {
        4 + key.len() + TAG_SIZE + 4 + value.len()
    }

    /// Encode an entry into `dst`, which must be exactly `encoded_len` bytes.
    fn encode(dst: &mut [u8], tag: u64, key: &[u8], value: &[u8]) {
        let mut offset = 0;
        encode_fixed32(&mut dst[offset..], key.len() as u32);
        offset += 4;
        dst[offset..offset + key.len()].copy_from_slice(key);
        offset += key.len();
        encode_fixed64(&mut dst[offset..], tag);
        offset += TAG_SIZE;
        encode_fixed32(&mut dst[offset..], value.len() as u32);
        offset += 4;
        dst[offset..offset + value.len()].copy_from_slice(value);
        debug_assert_eq!(offset + value.len(), dst.len());
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline]
    fn key_len(&self) -> usize {
        decode_fixed32(self.bytes()) as usize
    }

    #[inline]
    fn user_key(&self) -> &[u8] {
        &self.bytes()[4..4 + self.key_len()]
    }

    #[inline]
    fn tag(&self) -> u64 {
        let offset = 4 + self.key_len();
        decode_fixed64(&self.bytes()[offset..])
    }

    /// `user key | tag`, contiguous in the encoding.
    #[inline]
    fn internal_key(&self) -> &[u8] {
        &self.bytes()[4..4 + self.key_len() + TAG_SIZE]
    }

    #[inline]
    fn value(&self) -> &[u8] {
        let offset = 4 + self.key_len() + TAG_SIZE;
        let value_len = decode_fixed32(&self.bytes()[offset..]) as usize;
        &self.bytes()[offset + 4..offset + 4 + value_len]
    }
}

struct EntryComparator(InternalKeyComparator);

impl KeyComparator<EntryRef> for EntryComparator {
    #[inline]
    fn compare(&self, a: &EntryRef, b: &EntryRef) -> Ordering {
        self.0
            .compare_parts(a.user_key(), a.tag(), b.user_key(), b.tag())
    }
}

struct Inner {
    table: SkipList<EntryRef, EntryComparator>,
    arena: Arena,
}

/// Ordered in-memory write buffer.
///
/// Entries are encoded into an arena and indexed by a skip list ordered by user key
/// ascending, then sequence number descending. Writers take the internal lock
/// exclusively; readers and cursors share it. Share a memtable with `Arc<MemTable>`;
/// the arena and the skip list are freed together when the last `Arc` is dropped.
pub struct MemTable {
    inner: RwLock<Inner>,
    memory_usage: MemoryUsage,
    comparator: InternalKeyComparator,
}

impl Default for MemTable {
    fn default() -> Self {
        MemTable::new(Arc::new(BytewiseComparator))
    }
}

impl MemTable {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> MemTable {
        Self::with_options(user_comparator, Arena::default(), SkipListOptions::default())
    }

    pub fn with_options(
        user_comparator: Arc<dyn Comparator>,
        arena: Arena,
        options: SkipListOptions,
    ) -> MemTable {
        let comparator = InternalKeyComparator::new(user_comparator);
        let memory_usage = arena.memory_usage_handle();
        MemTable {
            inner: RwLock::new(Inner {
                table: SkipList::with_options(EntryComparator(comparator.clone()), options),
                arena,
            }),
            memory_usage,
            comparator,
        }
    }

    /// Add an entry that maps `key` to `value` at `sequence`.
    /// `value` is ignored by readers when `value_type` is `Deletion`.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        if sequence > MAX_SEQUENCE_NUMBER {
            return Err(KVStoneError::InvalidArgument(format!(
                "sequence number {} out of range",
                sequence
            )));
        }
        let tag = pack_sequence_and_type(sequence, value_type);
        let len = EntryRef::encoded_len(key, value);

        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;
        let entry = unsafe {
            let ptr = inner.arena.allocate(len);
            EntryRef::encode(std::slice::from_raw_parts_mut(ptr, len), tag, key, value);
            EntryRef { ptr, len }
        };
        if inner.table.insert(entry) {
            Ok(())
        } else {
            Err(KVStoneError::InvalidArgument(format!(
                "duplicate entry at sequence {}",
                sequence
            )))
        }
    }

    /// Newest value of `key`. Absent and deleted keys are `NotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.lookup(key, MAX_SEQUENCE_NUMBER) {
            Some(Lookup::Found(value)) => Ok(value),
            Some(Lookup::Deleted) | None => Err(KVStoneError::NotFound),
        }
    }

    /// Newest entry of `key` with a sequence number <= `sequence`.
    pub fn lookup(&self, key: &[u8], sequence: SequenceNumber) -> Option<Lookup> {
        let mut buf = vec![0; EntryRef::encoded_len(key, &[])];
        EntryRef::encode(
            &mut buf,
            pack_sequence_and_type(sequence.min(MAX_SEQUENCE_NUMBER), VALUE_TYPE_FOR_SEEK),
            key,
            &[],
        );
        let probe = EntryRef {
            ptr: buf.as_ptr(),
            len: buf.len(),
        };

        let guard = self.inner.read().unwrap();
        let entry = guard.table.lower_bound(&probe)?;
        if self
            .comparator
            .user_comparator()
            .compare(entry.user_key(), key)
            != Ordering::Equal
        {
            return None;
        }
        match ValueType::from_u8((entry.tag() & 0xff) as u8) {
            Some(ValueType::Value) => Some(Lookup::Found(entry.value().to_vec())),
            _ => Some(Lookup::Deleted),
        }
    }

    /// Bytes held by the arena. Does not take the lock.
    #[inline]
    pub fn approximate_memory_usage(&self) -> usize {
        self.memory_usage.get()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn internal_comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }

    /// Cursor over `(internal key, value)` pairs in internal key order.
    /// Writers block until the cursor is dropped.
    pub fn iter(&self) -> MemTableIterator<'_> {
        MemTableIterator {
            guard: self.inner.read().unwrap(),
            node: None,
        }
    }
}

pub struct MemTableIterator<'a> {
    guard: RwLockReadGuard<'a, Inner>,
    node: Option<NodeId>,
}

impl<'a> MemTableIterator<'a> {
    /// Position at the newest entry of `user_key` with a sequence number at most
    /// `sequence`, or at the first entry after it.
    pub fn seek_user_key(&mut self, user_key: &[u8], sequence: SequenceNumber) {
        let tag = pack_sequence_and_type(sequence.min(MAX_SEQUENCE_NUMBER), VALUE_TYPE_FOR_SEEK);
        self.seek_tagged(user_key, tag);
    }

    fn seek_tagged(&mut self, user_key: &[u8], tag: u64) {
        let mut buf = vec![0; EntryRef::encoded_len(user_key, &[])];
        EntryRef::encode(&mut buf, tag, user_key, &[]);
        let probe = EntryRef {
            ptr: buf.as_ptr(),
            len: buf.len(),
        };
        self.node = self.guard.table.seek(&probe);
    }

    #[inline]
    fn entry(&self) -> &EntryRef {
        match self.node {
            Some(node) => self.guard.table.key(node),
            None => unreachable!("memtable cursor is not valid"),
        }
    }
}

impl<'a> Cursor for MemTableIterator<'a> {
    fn valid(&self) -> bool {
        self.node.is_some()
    }

    fn seek_to_first(&mut self) {
        self.node = self.guard.table.first_node();
    }

    fn seek_to_last(&mut self) {
        self.node = self.guard.table.last_node();
    }

    /// `target` must be an internal key: a user key followed by its 8-byte tag. A
    /// plain user key of 8 bytes or more is split into a bogus user key and tag, so
    /// use [MemTableIterator::seek_user_key] for those. Targets shorter than a tag
    /// cannot be internal keys and seek to the newest entry of that user key.
    fn seek(&mut self, target: &[u8]) {
        if target.len() >= TAG_SIZE {
            let n = target.len() - TAG_SIZE;
            self.seek_tagged(&target[..n], decode_fixed64(&target[n..]));
        } else {
            self.seek_user_key(target, MAX_SEQUENCE_NUMBER);
        }
    }

    fn next(&mut self) {
        if let Some(node) = self.node {
            self.node = self.guard.table.next_node(node);
        }
    }

    fn prev(&mut self) {
        if let Some(node) = self.node {
            self.node = self.guard.table.prev_node(node);
        }
    }

    fn key(&self) -> &[u8] {
        self.entry().internal_key()
    }

    fn value(&self) -> &[u8] {
        self.entry().value()
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

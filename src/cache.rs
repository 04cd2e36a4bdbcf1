//! Sharded LRU cache with reference-counted handles.
//!
//! Every shard keeps its entries in a slab. Entries are linked by slab index into two
//! circular lists and a chained hash table:
//!
//! - `lru`: entries held only by the cache, oldest first. Eviction takes from here.
//! - `in_use`: entries also referenced by at least one [`CacheHandle`].
//!
//! An entry moves between the lists as its external references come and go. Entries
//! that have been erased, evicted or replaced but are still referenced sit on neither
//! list; their deleter runs when the last handle is released.

use crate::hash::hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const NUM_SHARD_BITS: u32 = 4;

const NIL: u32 = u32::MAX;
/// Sentinel of the `lru` list. `lru.next` is the oldest entry, `lru.prev` the newest.
const LRU_HEAD: u32 = 0;
/// Sentinel of the `in_use` list.
const IN_USE_HEAD: u32 = 1;

/// Called once with the key and value when an entry is destroyed.
pub type Deleter<V> = Box<dyn FnOnce(&[u8], &V) + Send>;

struct LRUEntry<V> {
    key: Vec<u8>,
    value: Option<Arc<V>>,
    deleter: Option<Deleter<V>>,
    charge: usize,
    hash: u32,
    /// references, including the cache's own while `in_cache`
    refs: u32,
    /// whether the hash table references this entry
    in_cache: bool,
    next_hash: u32,
    prev: u32,
    next: u32,
}

impl<V> LRUEntry<V> {
    fn sentinel(index: u32) -> LRUEntry<V> {
        LRUEntry {
            key: Vec::new(),
            value: None,
            deleter: None,
            charge: 0,
            hash: 0,
            refs: 0,
            in_cache: false,
            next_hash: NIL,
            prev: index,
            next: index,
        }
    }
}

/// Location of a chain link: a bucket head, or the `next_hash` of an entry.
#[derive(Clone, Copy)]
enum Link {
    Bucket(usize),
    Next(u32),
}

/// Open-chaining hash table over slab indexes.
struct HandleTable {
    list: Vec<u32>,
    elems: usize,
}

impl HandleTable {
    fn new() -> HandleTable {
        HandleTable {
            list: vec![NIL; 4],
            elems: 0,
        }
    }

    fn lookup<V>(&self, entries: &[LRUEntry<V>], key: &[u8], hash: u32) -> u32 {
        self.get(entries, self.find_link(entries, key, hash))
    }

    /// Link `index` into the table, replacing an entry with the same key.
    /// Returns the replaced entry, or `NIL`.
    fn insert<V>(&mut self, entries: &mut [LRUEntry<V>], index: u32) -> u32 {
        let link = {
            let e = &entries[index as usize];
            self.find_link(entries, &e.key, e.hash)
        };
        let old = self.get(entries, link);
        entries[index as usize].next_hash = if old == NIL {
            NIL
        } else {
            entries[old as usize].next_hash
        };
        self.set(entries, link, index);
        if old == NIL {
            self.elems += 1;
            if self.elems > self.list.len() {
                // Since each cache entry is fairly large, we aim for a small
                // average linked list length (<= 1).
                self.resize(entries);
            }
        }
        old
    }

    /// Unlink the entry with `key`. Returns it, or `NIL`.
    fn remove<V>(&mut self, entries: &mut [LRUEntry<V>], key: &[u8], hash: u32) -> u32 {
        let link = self.find_link(entries, key, hash);
        self.unlink(entries, link)
    }

    fn remove_entry<V>(&mut self, entries: &mut [LRUEntry<V>], index: u32) -> u32 {
        let link = {
            let e = &entries[index as usize];
            self.find_link(entries, &e.key, e.hash)
        };
        self.unlink(entries, link)
    }

    fn unlink<V>(&mut self, entries: &mut [LRUEntry<V>], link: Link) -> u32 {
        let result = self.get(entries, link);
        if result != NIL {
            let next = entries[result as usize].next_hash;
            self.set(entries, link, next);
            self.elems -= 1;
        }
        result
    }

    /// Return the link that points to the entry matching key/hash. If there is no such
    /// entry, return the link at the end of the corresponding chain.
    fn find_link<V>(&self, entries: &[LRUEntry<V>], key: &[u8], hash: u32) -> Link {
        let mut link = Link::Bucket(hash as usize & (self.list.len() - 1));
        loop {
            let index = self.get(entries, link);
            if index == NIL {
                return link;
            }
            let e = &entries[index as usize];
            if e.hash == hash && e.key == key {
                return link;
            }
            link = Link::Next(index);
        }
    }

    #[inline]
    fn get<V>(&self, entries: &[LRUEntry<V>], link: Link) -> u32 {
        match link {
            Link::Bucket(b) => self.list[b],
            Link::Next(index) => entries[index as usize].next_hash,
        }
    }

    #[inline]
    fn set<V>(&mut self, entries: &mut [LRUEntry<V>], link: Link, value: u32) {
        match link {
            Link::Bucket(b) => self.list[b] = value,
            Link::Next(index) => entries[index as usize].next_hash = value,
        }
    }

    fn resize<V>(&mut self, entries: &mut [LRUEntry<V>]) {
        let mut new_length = 4;
        while new_length < self.elems {
            new_length *= 2;
        }
        let mut new_list = vec![NIL; new_length];
        let mut count = 0;
        for &head in &self.list {
            let mut h = head;
            while h != NIL {
                let e = &mut entries[h as usize];
                let next = e.next_hash;
                let bucket = e.hash as usize & (new_length - 1);
                e.next_hash = new_list[bucket];
                new_list[bucket] = h;
                h = next;
                count += 1;
            }
        }
        debug_assert_eq!(self.elems, count);
        self.list = new_list;
    }
}

/// A single shard of the sharded cache.
struct LRUCache<V> {
    capacity: usize,
    usage: usize,
    entries: Vec<LRUEntry<V>>,
    free: Vec<u32>,
    table: HandleTable,
}

impl<V> LRUCache<V> {
    fn new(capacity: usize) -> LRUCache<V> {
        LRUCache {
            capacity,
            usage: 0,
            entries: vec![LRUEntry::sentinel(LRU_HEAD), LRUEntry::sentinel(IN_USE_HEAD)],
            free: Vec::new(),
            table: HandleTable::new(),
        }
    }

    #[inline]
    fn value(&self, index: u32) -> &Arc<V> {
        match &self.entries[index as usize].value {
            Some(value) => value,
            None => unreachable!("cache entry {} has no value", index),
        }
    }

    fn ref_entry(&mut self, index: u32) {
        let e = &self.entries[index as usize];
        if e.refs == 1 && e.in_cache {
            // If on lru list, move to in_use list.
            self.list_remove(index);
            self.list_append(IN_USE_HEAD, index);
        }
        self.entries[index as usize].refs += 1;
    }

    fn unref(&mut self, index: u32) {
        let e = &mut self.entries[index as usize];
        debug_assert!(e.refs > 0);
        e.refs -= 1;
        if e.refs == 0 {
            // Deallocate.
            debug_assert!(!e.in_cache);
            let key = std::mem::take(&mut e.key);
            let value = e.value.take();
            if let (Some(deleter), Some(value)) = (e.deleter.take(), value) {
                deleter(&key, &value);
            }
            self.free.push(index);
        } else if e.in_cache && e.refs == 1 {
            // No longer in use; move to lru list.
            self.list_remove(index);
            self.list_append(LRU_HEAD, index);
        }
    }

    fn list_remove(&mut self, index: u32) {
        let (prev, next) = {
            let e = &self.entries[index as usize];
            (e.prev, e.next)
        };
        self.entries[next as usize].prev = prev;
        self.entries[prev as usize].next = next;
    }

    /// Make `index` the newest entry by inserting it just before `list`.
    fn list_append(&mut self, list: u32, index: u32) {
        let prev = self.entries[list as usize].prev;
        {
            let e = &mut self.entries[index as usize];
            e.next = list;
            e.prev = prev;
        }
        self.entries[prev as usize].next = index;
        self.entries[list as usize].prev = index;
    }

    fn lookup(&mut self, key: &[u8], hash: u32) -> Option<u32> {
        let index = self.table.lookup(&self.entries, key, hash);
        if index == NIL {
            return None;
        }
        self.ref_entry(index);
        Some(index)
    }

    fn release(&mut self, index: u32) {
        self.unref(index);
    }

    fn alloc_entry(&mut self, entry: LRUEntry<V>) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as u32
            }
        }
    }

    fn insert(
        &mut self,
        key: &[u8],
        hash: u32,
        value: Arc<V>,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> u32 {
        let index = self.alloc_entry(LRUEntry {
            key: key.to_vec(),
            value: Some(value),
            deleter,
            charge,
            hash,
            // for the returned handle.
            refs: 1,
            in_cache: false,
            next_hash: NIL,
            prev: NIL,
            next: NIL,
        });

        if self.capacity > 0 {
            // for the cache's reference.
            let e = &mut self.entries[index as usize];
            e.refs += 1;
            e.in_cache = true;
            self.list_append(IN_USE_HEAD, index);
            self.usage += charge;
            let old = self.table.insert(&mut self.entries, index);
            self.finish_erase(old);
        }
        // else don't cache. (capacity == 0 is supported and turns off caching.)

        while self.usage > self.capacity && self.entries[LRU_HEAD as usize].next != LRU_HEAD {
            let old = self.entries[LRU_HEAD as usize].next;
            debug_assert_eq!(self.entries[old as usize].refs, 1);
            debug!(
                "cache evicts entry of charge {}",
                self.entries[old as usize].charge
            );
            let removed = self.table.remove_entry(&mut self.entries, old);
            self.finish_erase(removed);
        }
        index
    }

    /// Finish removing an entry that has just been removed from the hash table.
    /// Returns whether `index` named an entry.
    fn finish_erase(&mut self, index: u32) -> bool {
        if index == NIL {
            return false;
        }
        debug_assert!(self.entries[index as usize].in_cache);
        self.list_remove(index);
        let e = &mut self.entries[index as usize];
        e.in_cache = false;
        self.usage -= e.charge;
        self.unref(index);
        true
    }

    fn erase(&mut self, key: &[u8], hash: u32) {
        let index = self.table.remove(&mut self.entries, key, hash);
        self.finish_erase(index);
    }

    fn prune(&mut self) {
        while self.entries[LRU_HEAD as usize].next != LRU_HEAD {
            let index = self.entries[LRU_HEAD as usize].next;
            debug_assert_eq!(self.entries[index as usize].refs, 1);
            let removed = self.table.remove_entry(&mut self.entries, index);
            self.finish_erase(removed);
        }
    }

    fn total_charge(&self) -> usize {
        self.usage
    }
}

impl<V> Drop for LRUCache<V> {
    fn drop(&mut self) {
        // Handles borrow the cache, so none is outstanding here.
        debug_assert_eq!(self.entries[IN_USE_HEAD as usize].next, IN_USE_HEAD);
        self.prune();
    }
}

/// Reference to a cached value. The reference is released when the handle is dropped.
pub struct CacheHandle<'a, V> {
    cache: &'a ShardedLRUCache<V>,
    shard: usize,
    index: u32,
    value: Arc<V>,
}

impl<'a, V> CacheHandle<'a, V> {
    /// Shared pointer to the value, usable after the handle is released.
    pub fn value(&self) -> Arc<V> {
        self.value.clone()
    }
}

impl<'a, V> Deref for CacheHandle<'a, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<'a, V> Drop for CacheHandle<'a, V> {
    fn drop(&mut self) {
        self.cache.shards[self.shard]
            .lock()
            .unwrap()
            .release(self.index);
    }
}

/// Cache mapping byte keys to shared values, split into `1 << shard_bits`
/// independently locked shards with separate capacities.
pub struct ShardedLRUCache<V> {
    shards: Vec<Mutex<LRUCache<V>>>,
    shard_bits: u32,
    last_id: AtomicU64,
}

impl<V> ShardedLRUCache<V> {
    pub fn new(capacity: usize) -> ShardedLRUCache<V> {
        Self::with_shard_bits(capacity, NUM_SHARD_BITS)
    }

    pub fn with_shard_bits(capacity: usize, shard_bits: u32) -> ShardedLRUCache<V> {
        assert!(shard_bits < 32);
        let num_shards = 1usize << shard_bits;
        let per_shard = (capacity + (num_shards - 1)) / num_shards;
        ShardedLRUCache {
            shards: (0..num_shards)
                .map(|_| Mutex::new(LRUCache::new(per_shard)))
                .collect(),
            shard_bits,
            last_id: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, hash: u32) -> usize {
        if self.shard_bits == 0 {
            0
        } else {
            (hash >> (32 - self.shard_bits)) as usize
        }
    }

    /// Insert a mapping from `key` to `value` charged against the capacity, replacing any
    /// existing mapping. The returned handle references the new entry; the deleter runs
    /// once the entry is no longer needed.
    pub fn insert(
        &self,
        key: &[u8],
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> CacheHandle<'_, V> {
        let hash = hash(key, 0);
        let shard = self.shard(hash);
        let value = Arc::new(value);
        let index = self.shards[shard].lock().unwrap().insert(
            key,
            hash,
            value.clone(),
            charge,
            deleter,
        );
        CacheHandle {
            cache: self,
            shard,
            index,
            value,
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle<'_, V>> {
        let hash = hash(key, 0);
        let shard = self.shard(hash);
        let mut cache = self.shards[shard].lock().unwrap();
        let index = cache.lookup(key, hash)?;
        let value = cache.value(index).clone();
        Some(CacheHandle {
            cache: self,
            shard,
            index,
            value,
        })
    }

    /// Release a handle returned by `insert` or `lookup`. Same as dropping it.
    pub fn release(&self, handle: CacheHandle<'_, V>) {
        debug_assert!(std::ptr::eq(handle.cache, self));
        drop(handle);
    }

    /// Drop the mapping for `key`. The entry lives on while handles reference it.
    pub fn erase(&self, key: &[u8]) {
        let hash = hash(key, 0);
        self.shards[self.shard(hash)]
            .lock()
            .unwrap()
            .erase(key, hash);
    }

    /// Remove every entry not referenced by a handle.
    pub fn prune(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().prune();
        }
    }

    pub fn total_charge(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap().total_charge())
            .sum()
    }

    /// A new numeric id, for clients sharing the cache to partition its key space.
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

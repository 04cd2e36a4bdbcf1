use crate::collections::skip_list::{
    rand_level, KeyComparator, SkipListOptions, MAX_LEVEL_LIMIT,
};
use rand::rngs::StdRng;
use std::cmp::Ordering;

const NIL: u32 = u32::MAX;
const HEAD: u32 = 0;

/// Stable position of a node inside a [`SkipList`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeId(u32);

struct Node<K> {
    key: K,
    /// index of this node's level-0 link in `SkipList::links`
    tower: u32,
    height: u8,
}

/// Ordered set of unique keys.
///
/// Nodes live in a slab indexed by `u32` and their forward links in one flat vector, so the
/// list owns all of its memory and node handles are plain indexes. A removed node keeps its
/// slot until the list is dropped.
///
/// # NOTICE:
///
/// SkipList is not thread-safe; wrap it in a lock to share it.
pub struct SkipList<K: Default, C: KeyComparator<K>> {
    comparator: C,
    nodes: Vec<Node<K>>,
    links: Vec<u32>,
    /// number of levels currently in use, in `[1, max_level]`
    level: usize,
    len: usize,
    max_level: usize,
    branching: u32,
    rng: StdRng,
}

impl<K: Default, C: KeyComparator<K>> SkipList<K, C> {
    pub fn new(comparator: C) -> SkipList<K, C> {
        Self::with_options(comparator, SkipListOptions::default())
    }

    pub fn with_options(comparator: C, options: SkipListOptions) -> SkipList<K, C> {
        assert!(options.max_level >= 1 && options.max_level <= MAX_LEVEL_LIMIT);
        assert!(options.branching >= 2);
        let mut list = SkipList {
            comparator,
            nodes: Vec::new(),
            links: Vec::new(),
            level: 1,
            len: 0,
            max_level: options.max_level,
            branching: options.branching,
            rng: options.rng(),
        };
        list.new_node(K::default(), options.max_level);
        list
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `key`. Returns false and leaves the list untouched if an equal key is present.
    pub fn insert(&mut self, key: K) -> bool {
        let mut prev = [HEAD; MAX_LEVEL_LIMIT];
        let x = self.find_greater_or_equal(&key, Some(&mut prev));
        if x != NIL && self.comparator.compare(self.key_of(x), &key) == Ordering::Equal {
            return false;
        }

        // levels above the current height are already linked from `HEAD` in `prev`
        let height = rand_level(&mut self.rng, self.max_level, self.branching);
        if height > self.level {
            self.level = height;
        }

        let id = self.new_node(key, height);
        for (i, &p) in prev.iter().enumerate().take(height) {
            let next = self.next(p, i);
            self.set_next(id, i, next);
            self.set_next(p, i, id);
        }
        self.len += 1;
        true
    }

    /// Unlink the node equal to `key`. Returns whether one was found.
    pub fn remove(&mut self, key: &K) -> bool {
        let mut prev = [HEAD; MAX_LEVEL_LIMIT];
        let x = self.find_greater_or_equal(key, Some(&mut prev));
        if x == NIL || self.comparator.compare(self.key_of(x), key) != Ordering::Equal {
            return false;
        }
        let height = self.nodes[x as usize].height as usize;
        for (i, &p) in prev.iter().enumerate().take(height) {
            if self.next(p, i) != x {
                break;
            }
            let next = self.next(x, i);
            self.set_next(p, i, next);
        }
        while self.level > 1 && self.next(HEAD, self.level - 1) == NIL {
            self.level -= 1;
        }
        self.len -= 1;
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.search(key).is_some()
    }

    /// The stored key equal to `key`.
    pub fn search(&self, key: &K) -> Option<&K> {
        self.lower_bound(key)
            .filter(|found| self.comparator.compare(found, key) == Ordering::Equal)
    }

    /// The smallest stored key >= `key`.
    pub fn lower_bound(&self, key: &K) -> Option<&K> {
        self.seek(key).map(|n| self.key(n))
    }

    /// The largest stored key < `key`.
    pub fn find_less_than(&self, key: &K) -> Option<&K> {
        let x = self.find_less_than_node(key);
        self.to_id(x).map(|n| self.key(n))
    }

    pub fn first(&self) -> Option<&K> {
        self.first_node().map(|n| self.key(n))
    }

    pub fn last(&self) -> Option<&K> {
        self.last_node().map(|n| self.key(n))
    }

    pub fn iter(&self) -> Iter<'_, K, C> {
        Iter {
            list: self,
            node: self.next(HEAD, 0),
        }
    }

    /// Node of the smallest key >= `key`.
    pub fn seek(&self, key: &K) -> Option<NodeId> {
        let x = self.find_greater_or_equal(key, None);
        self.to_id(x)
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.to_id(self.next(HEAD, 0))
    }

    pub fn last_node(&self) -> Option<NodeId> {
        let mut x = HEAD;
        let mut level = self.level - 1;
        loop {
            let next = self.next(x, level);
            if next != NIL {
                x = next;
            } else if level == 0 {
                return self.to_id(x);
            } else {
                level -= 1;
            }
        }
    }

    pub fn next_node(&self, node: NodeId) -> Option<NodeId> {
        self.to_id(self.next(node.0, 0))
    }

    /// Predecessor of `node`, found by a search from the head.
    pub fn prev_node(&self, node: NodeId) -> Option<NodeId> {
        let x = self.find_less_than_node(self.key_of(node.0));
        self.to_id(x)
    }

    #[inline]
    pub fn key(&self, node: NodeId) -> &K {
        self.key_of(node.0)
    }

    #[inline]
    fn key_of(&self, node: u32) -> &K {
        &self.nodes[node as usize].key
    }

    #[inline]
    fn to_id(&self, node: u32) -> Option<NodeId> {
        if node == NIL || node == HEAD {
            None
        } else {
            Some(NodeId(node))
        }
    }

    #[inline]
    fn next(&self, node: u32, level: usize) -> u32 {
        let n = &self.nodes[node as usize];
        debug_assert!(level < n.height as usize);
        self.links[n.tower as usize + level]
    }

    #[inline]
    fn set_next(&mut self, node: u32, level: usize, next: u32) {
        let n = &self.nodes[node as usize];
        debug_assert!(level < n.height as usize);
        self.links[n.tower as usize + level] = next;
    }

    fn new_node(&mut self, key: K, height: usize) -> u32 {
        let id = self.nodes.len() as u32;
        assert!(id != NIL, "skip list is full");
        self.nodes.push(Node {
            key,
            tower: self.links.len() as u32,
            height: height as u8,
        });
        self.links.resize(self.links.len() + height, NIL);
        id
    }

    #[inline]
    fn key_is_after_node(&self, key: &K, node: u32) -> bool {
        node != NIL && self.comparator.compare(self.key_of(node), key) == Ordering::Less
    }

    /// Return the first node whose key is greater or equal than `key`, or `NIL`.
    /// If `prev` is `Some(...)`, it is filled with the predecessor at each level in use.
    fn find_greater_or_equal(&self, key: &K, mut prev: Option<&mut [u32; MAX_LEVEL_LIMIT]>) -> u32 {
        let mut x = HEAD;
        let mut level = self.level - 1;
        loop {
            let next = self.next(x, level);
            if self.key_is_after_node(key, next) {
                // Keep searching in this list
                x = next;
            } else {
                if let Some(p) = prev.as_mut() {
                    p[level] = x;
                }
                if level == 0 {
                    return next;
                }
                // Switch to next list
                level -= 1;
            }
        }
    }

    /// Return the last node whose key is less than `key`, or `HEAD`.
    fn find_less_than_node(&self, key: &K) -> u32 {
        let mut x = HEAD;
        let mut level = self.level - 1;
        loop {
            let next = self.next(x, level);
            if self.key_is_after_node(key, next) {
                x = next;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }
}

pub struct Iter<'a, K: Default, C: KeyComparator<K>> {
    list: &'a SkipList<K, C>,
    node: u32,
}

impl<'a, K: Default, C: KeyComparator<K>> Iterator for Iter<'a, K, C> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.node == NIL {
            return None;
        }
        let list = self.list;
        let key = list.key_of(self.node);
        self.node = list.next(self.node, 0);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use crate::collections::skip_list::skiplist::{SkipList, HEAD, NIL};
    use crate::collections::skip_list::{KeyComparator, OrdComparator, SkipListOptions};
    use rand::{Rng, SeedableRng};
    use std::cmp::Ordering;
    use std::collections::BTreeSet;

    fn check_levels<C: KeyComparator<u64>>(list: &SkipList<u64, C>) {
        // every level is a sorted sub-sequence of the level below
        for level in 0..list.level {
            let mut x = list.next(HEAD, level);
            let mut last: Option<u64> = None;
            let mut count = 0;
            while x != NIL {
                let key = *list.key_of(x);
                if let Some(l) = last {
                    assert_eq!(list.comparator.compare(&l, &key), Ordering::Less);
                }
                if level > 0 {
                    assert!(list.contains(&key));
                }
                last = Some(key);
                count += 1;
                x = list.next(x, level);
            }
            if level == 0 {
                assert_eq!(count, list.len());
            }
        }
    }

    #[test]
    fn test_empty() {
        let list: SkipList<u64, OrdComparator> = SkipList::new(OrdComparator);
        assert!(list.is_empty());
        assert!(!list.contains(&10));
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        assert_eq!(list.lower_bound(&100), None);
        assert_eq!(list.find_less_than(&100), None);
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn test_insert_and_lookup() {
        const N: u64 = 2000;
        const R: u64 = 5000;
        let mut rng = rand::rngs::StdRng::seed_from_u64(1000);
        let mut keys = BTreeSet::new();
        let mut list = SkipList::with_options(
            OrdComparator,
            SkipListOptions {
                seed: Some(7),
                ..Default::default()
            },
        );
        for _ in 0..N {
            let key = rng.gen_range(0..R);
            assert_eq!(keys.insert(key), list.insert(key));
        }
        assert_eq!(list.len(), keys.len());
        check_levels(&list);

        for i in 0..R {
            assert_eq!(list.contains(&i), keys.contains(&i), "key {}", i);
            assert_eq!(list.lower_bound(&i), keys.range(i..).next());
            assert_eq!(list.find_less_than(&i), keys.range(..i).next_back());
        }
        assert_eq!(list.first(), keys.iter().next());
        assert_eq!(list.last(), keys.iter().next_back());

        let forward: Vec<u64> = list.iter().copied().collect();
        let expected: Vec<u64> = keys.iter().copied().collect();
        assert_eq!(forward, expected);

        let mut backward = vec![];
        let mut node = list.last_node();
        while let Some(n) = node {
            backward.push(*list.key(n));
            node = list.prev_node(n);
        }
        backward.reverse();
        assert_eq!(backward, expected);
    }

    #[test]
    fn test_remove() {
        let mut list = SkipList::new(OrdComparator);
        for i in (0..1000u64).rev() {
            assert!(list.insert(i * 2));
        }
        assert!(!list.insert(10));
        assert!(!list.remove(&3));
        for i in 0..500u64 {
            assert!(list.remove(&(i * 4)));
        }
        assert_eq!(list.len(), 500);
        check_levels(&list);
        assert!(!list.contains(&0));
        assert!(list.contains(&2));
        assert_eq!(list.lower_bound(&4), Some(&6));

        for i in 0..500u64 {
            assert!(list.remove(&(i * 4 + 2)));
        }
        assert!(list.is_empty());
        assert_eq!(list.level, 1);
        assert_eq!(list.first(), None);

        // a removed key can come back
        assert!(list.insert(4));
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[derive(Default)]
    struct Reverse;

    impl KeyComparator<u64> for Reverse {
        fn compare(&self, a: &u64, b: &u64) -> Ordering {
            b.cmp(a)
        }
    }

    #[test]
    fn test_custom_comparator() {
        let mut list = SkipList::new(Reverse);
        for i in 0..100u64 {
            list.insert(i);
        }
        check_levels(&list);
        assert_eq!(list.first(), Some(&99));
        assert_eq!(list.last(), Some(&0));
        assert_eq!(list.lower_bound(&50), Some(&50));
        assert_eq!(list.find_less_than(&50), Some(&51));
    }

    #[test]
    fn test_heights_are_bounded() {
        let mut list = SkipList::with_options(
            OrdComparator,
            SkipListOptions {
                max_level: 3,
                branching: 2,
                seed: Some(1),
            },
        );
        for i in 0..10000u64 {
            list.insert(i);
        }
        assert!(list.level <= 3);
        assert!(list.nodes.iter().all(|n| n.height as usize <= 3));
        check_levels(&list);
    }
}

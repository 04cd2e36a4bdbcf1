pub mod arena;
pub mod skiplist;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

pub const MAX_LEVEL: usize = 12;

/// Upper bound accepted for [`SkipListOptions::max_level`].
pub const MAX_LEVEL_LIMIT: usize = 32;

pub const BRANCHING: u32 = 4;

/// Orders the keys stored in a skip list.
pub trait KeyComparator<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator using the key's own `Ord`.
#[derive(Default, Clone, Copy, Debug)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

#[derive(Clone, Debug)]
pub struct SkipListOptions {
    /// Tallest tower a node can get.
    pub max_level: usize,
    /// A node of height h gets height h + 1 with probability 1 / branching.
    pub branching: u32,
    /// Fixed seed for reproducible tower heights; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SkipListOptions {
    fn default() -> Self {
        SkipListOptions {
            max_level: MAX_LEVEL,
            branching: BRANCHING,
            seed: None,
        }
    }
}

impl SkipListOptions {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Pick a tower height in `[1, max_level]`.
fn rand_level(rng: &mut StdRng, max_level: usize, branching: u32) -> usize {
    let mut level = 1;
    while level < max_level && rng.gen_range(0..branching) == 0 {
        level += 1;
    }
    level
}

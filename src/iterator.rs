//! Seekable cursors over sorted key-value sources.

use crate::comparator::Comparator;
use crate::error::KVStoneError;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// A position inside a sorted sequence of key-value pairs.
///
/// `key` and `value` may only be called while `valid()` is true.
pub trait Cursor {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Position at the first entry whose key is >= `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// Error met while moving, if any. A cursor in error state is not valid.
    fn status(&self) -> Result<()>;
}

/// Cursor over nothing, optionally carrying an error.
#[derive(Default)]
pub struct EmptyCursor {
    err: Option<KVStoneError>,
}

impl EmptyCursor {
    pub fn with_error(err: KVStoneError) -> EmptyCursor {
        EmptyCursor { err: Some(err) }
    }
}

impl Cursor for EmptyCursor {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {
        debug_assert!(false, "next() on empty cursor");
    }

    fn prev(&mut self) {
        debug_assert!(false, "prev() on empty cursor");
    }

    fn key(&self) -> &[u8] {
        unreachable!("key() on empty cursor")
    }

    fn value(&self) -> &[u8] {
        unreachable!("value() on empty cursor")
    }

    fn status(&self) -> Result<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum Direction {
    Forward,
    Reverse,
}

/// Sorted union of several cursors. Entries with equal keys are all yielded,
/// in the order of the children list.
pub struct MergingCursor<'a> {
    comparator: Arc<dyn Comparator>,
    children: Vec<Box<dyn Cursor + 'a>>,
    current: Option<usize>,
    direction: Direction,
}

impl<'a> MergingCursor<'a> {
    pub fn new(
        comparator: Arc<dyn Comparator>,
        children: Vec<Box<dyn Cursor + 'a>>,
    ) -> MergingCursor<'a> {
        MergingCursor {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                Some(s)
                    if self.comparator.compare(child.key(), self.children[s].key())
                        != Ordering::Less =>
                {
                    Some(s)
                }
                _ => Some(i),
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.valid() {
                continue;
            }
            largest = match largest {
                Some(l)
                    if self.comparator.compare(child.key(), self.children[l].key())
                        != Ordering::Greater =>
                {
                    Some(l)
                }
                _ => Some(i),
            };
        }
        self.current = largest;
    }
}

impl<'a> Cursor for MergingCursor<'a> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let current = match self.current {
            Some(current) => current,
            None => return,
        };

        // Ensure that all children are positioned after key(). If we are moving in the
        // forward direction, it is already true for all of the non-current children since
        // current is the smallest child and key() == current.key().
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() && self.comparator.compare(&key, child.key()) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let current = match self.current {
            Some(current) => current,
            None => return,
        };

        // Ensure that all children are positioned before key().
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    // child is at first entry >= key(); step back one to be < key()
                    child.prev();
                } else {
                    // child has no entries >= key(); position at last entry
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}

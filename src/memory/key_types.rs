//! Internal keys: a user key tagged with a sequence number and an operation type.
//!
//! ```text
//! internal key := user key | tag: u64 LE
//! tag          := (sequence << 8) | value type
//! ```

use crate::byteutils::{decode_fixed64, put_fixed64};
use crate::comparator::Comparator;
use crate::error::KVStoneError;
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

pub type SequenceNumber = u64;

/// Sequence numbers use the upper 56 bits of the tag.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

pub const TAG_SIZE: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

/// The type sorting first among entries of equal user key and sequence,
/// so a seek for `(key, seq)` lands on the newest entry at or below `seq`.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(b: u8) -> Option<ValueType> {
        match b {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

#[inline]
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(sequence, value_type));
}

pub fn internal_key(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + TAG_SIZE);
    append_internal_key(&mut key, user_key, sequence, value_type);
    key
}

#[derive(Debug, PartialEq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

pub fn parse_internal_key(internal_key: &[u8]) -> Result<ParsedInternalKey<'_>> {
    if internal_key.len() < TAG_SIZE {
        return Err(KVStoneError::Corruption(format!(
            "internal key too short: {} bytes",
            internal_key.len()
        )));
    }
    let (user_key, tag) = split_internal_key(internal_key);
    let value_type = ValueType::from_u8((tag & 0xff) as u8).ok_or_else(|| {
        KVStoneError::Corruption(format!("unknown value type {}", tag & 0xff))
    })?;
    Ok(ParsedInternalKey {
        user_key,
        sequence: tag >> 8,
        value_type,
    })
}

/// User key part of an internal key. Keys shorter than a tag are returned whole.
#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    split_internal_key(internal_key).0
}

#[inline]
fn split_internal_key(internal_key: &[u8]) -> (&[u8], u64) {
    if internal_key.len() < TAG_SIZE {
        return (internal_key, 0);
    }
    let n = internal_key.len() - TAG_SIZE;
    (&internal_key[..n], decode_fixed64(&internal_key[n..]))
}

/// Orders internal keys by user key ascending, then by tag descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }

    /// Compare `(user key, tag)` pairs directly.
    #[inline]
    pub fn compare_parts(&self, a: &[u8], a_tag: u64, b: &[u8], b_tag: u64) -> Ordering {
        match self.user_comparator.compare(a, b) {
            Ordering::Equal => b_tag.cmp(&a_tag),
            o => o,
        }
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "kvstone.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (a_user, a_tag) = split_internal_key(a);
        let (b_user, b_tag) = split_internal_key(b);
        self.compare_parts(a_user, a_tag, b_user, b_tag)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // Attempt to shorten the user portion of the key
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // User key has become shorter physically, but larger logically.
            // Tack on the earliest possible number to the shortened user key.
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len() && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}

/// Result of looking a user key up at some sequence number.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Lookup {
    Found(Vec<u8>),
    /// The newest visible entry is a tombstone.
    Deleted,
}

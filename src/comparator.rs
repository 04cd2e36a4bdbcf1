use std::cmp::Ordering;

/// Total order over keys stored in tables and blocks.
pub trait Comparator: Send + Sync {
    /// Name persisted with the data; a table must be read with the comparator it was built with.
    fn name(&self) -> &'static str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// If `*start < limit`, change `*start` to a short key in `[start, limit)`.
    /// Used to shrink index block keys.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Change `*key` to a short key >= `*key`.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Lexicographic byte order.
#[derive(Default, Clone, Copy, Debug)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "kvstone.BytewiseComparator"
    }

    #[inline]
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_length = start.len().min(limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }

        if diff_index >= min_length {
            // one key is a prefix of the other
            return;
        }
        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        // Find first character that can be incremented
        if let Some(i) = key.iter().position(|&b| b != 0xff) {
            key[i] += 1;
            key.truncate(i + 1);
        }
        // `key` is a run of 0xffs; leave it alone.
    }
}

#[cfg(test)]
mod tests {
    use crate::comparator::{BytewiseComparator, Comparator};
    use std::cmp::Ordering;

    fn separator(start: &[u8], limit: &[u8]) -> Vec<u8> {
        let mut s = start.to_vec();
        BytewiseComparator.find_shortest_separator(&mut s, limit);
        s
    }

    #[test]
    fn test_shortest_separator() {
        assert_eq!(separator(b"abcdefg", b"abzzz"), b"abd");
        assert_eq!(separator(b"helloworld", b"hellozoomer"), b"hellox");
        // adjacent bytes cannot be shortened
        assert_eq!(separator(b"abc1", b"abc2"), b"abc1");
        // prefix
        assert_eq!(separator(b"abc", b"abcdef"), b"abc");
        assert_eq!(separator(&[0x01, 0xff, 0x10], &[0x02, 0x00]), [0x01u8, 0xff, 0x10]);
        for (start, limit) in [
            (&b"key0001"[..], &b"key0100"[..]),
            (&b"a"[..], &b"c"[..]),
            (&b""[..], &b"z"[..]),
        ] {
            let s = separator(start, limit);
            assert_ne!(BytewiseComparator.compare(&s, start), Ordering::Less);
            assert_eq!(BytewiseComparator.compare(&s, limit), Ordering::Less);
        }
    }

    #[test]
    fn test_short_successor() {
        let mut key = b"abcd".to_vec();
        BytewiseComparator.find_short_successor(&mut key);
        assert_eq!(key, b"b");

        let mut key = vec![0xff, 0xff, 0x03];
        BytewiseComparator.find_short_successor(&mut key);
        assert_eq!(key, [0xffu8, 0xff, 0x04]);

        let mut key = vec![0xff, 0xff];
        BytewiseComparator.find_short_successor(&mut key);
        assert_eq!(key, [0xffu8, 0xff]);
    }
}

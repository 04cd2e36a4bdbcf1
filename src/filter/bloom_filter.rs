use crate::filter::{FilterPolicy, SEED};
use crate::hash::murmur_hash;
use std::cmp::max;

/// Bloom filter using double hashing over one murmur hash.
///
/// A filter is the bit array followed by one byte holding the number of probes.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: u8,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> BloomFilterPolicy {
        // We intentionally round down to reduce probing cost a little bit
        // K =~ ln(2) * bits_per_key
        let k = (bits_per_key as f64 * 0.69) as usize;
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30) as u8,
        }
    }

    /// Compute bloom filter size (in bytes).
    /// For small n, we can see a very high false positive rate.  Fix it
    /// by enforcing a minimum bloom filter length.
    #[inline]
    fn calc_bytes(&self, num_keys: usize) -> usize {
        let bits = max(num_keys * self.bits_per_key, 64);
        (bits + 7) / 8
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "kvstone.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let bytes = self.calc_bytes(keys.len());
        let bits = (bytes * 8) as u32;

        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        // Remember # of probes in filter
        dst.push(self.k);
        let array = &mut dst[init_size..init_size + bytes];
        for key in keys {
            let mut h = murmur_hash(key, SEED);
            let delta = (h >> 17) | (h << 15); // rotate right 17 bits
            for _ in 0..self.k {
                let bit_pos = h % bits;
                array[(bit_pos / 8) as usize] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let (array, k) = filter.split_at(filter.len() - 1);
        let k = k[0];
        if k > 30 {
            // Reserved for potentially new encodings for short bloom filters.
            // Consider it a match.
            return true;
        }
        let bits = (array.len() * 8) as u32;

        let mut h = murmur_hash(key, SEED);
        let delta = (h >> 17) | (h << 15); // rotate right 17 bits
        for _ in 0..k {
            let bit_pos = h % bits;
            if (array[(bit_pos / 8) as usize] & (1 << (bit_pos % 8))) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

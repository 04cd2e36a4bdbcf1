//! Implementation of murmur hash: [https://sites.google.com/site/murmurhash/]

use crate::byteutils::decode_fixed32;

pub fn murmur_hash(key: &[u8], seed: u32) -> u32 {
    // 'M' and 'R' are mixing constants generated offline.
    // They're not really 'magic', they just happen to work well.
    const M: u32 = 0x5bd1e995;
    const R: i32 = 24;

    // Initialize the hash to a 'random' value
    let mut h: u32 = seed ^ key.len() as u32;

    // Mix 4 bytes at a time into the hash
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = decode_fixed32(chunk);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    // Handle the last few bytes of the input array
    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    // Do a few final mixes of the hash to ensure the last few
    // bytes are well-incorporated.
    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Hash used to pick cache shards and hash-table buckets, similar to murmur hash.
pub fn hash(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4a793;
    const R: u32 = 24;

    let mut h: u32 = seed ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        h = h.wrapping_add(decode_fixed32(chunk));
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h = h.wrapping_add((tail[2] as u32) << 16);
    }
    if tail.len() >= 2 {
        h = h.wrapping_add((tail[1] as u32) << 8);
    }
    if !tail.is_empty() {
        h = h.wrapping_add(tail[0] as u32);
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

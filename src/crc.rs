//! Masked CRC32C used for block trailers.
//!
//! Computing the CRC of a string that itself contains embedded CRCs is problematic, so stored
//! checksums are rotated and offset by a constant.

const MASK_DELTA: u32 = 0xa282ead8;

#[inline]
pub fn value(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Crc32c of `concat(A, data)` where `init_crc` is the crc32c of some string A.
#[inline]
pub fn extend(init_crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(init_crc, data)
}

#[inline]
pub fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

#[inline]
pub fn unmask(masked_crc: u32) -> u32 {
    let rot = masked_crc.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

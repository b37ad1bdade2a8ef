//! CRC32 helpers
//!
//! Slot checksums are stored in 8-byte fields: the CRC32 value is widened to
//! `u64` so that values outside `0..=u32::MAX` can serve as sentinels.

/// CRC32 of `data`, widened to 64 bits.
pub fn crc32(data: &[u8]) -> u64 {
    u64::from(crc32fast::hash(data))
}

/// CRC32 of `data` as stored in 4-byte record headers.
pub fn crc32_u32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

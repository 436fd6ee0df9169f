//! CRC32C checksum.
//!
//! The `crc32c` crate selects the hardware-accelerated implementation
//! (SSE4.2 `crc32` instruction on x86_64, the ARMv8 CRC extension, vector
//! instructions on s390x) at runtime, falling back to a table-driven
//! byte-at-a-time routine otherwise, without having to hand-roll per-arch
//! intrinsics.

/// Computes the CRC32C of `data`.
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Computes the CRC32C of `data` continuing from a previous checksum value,
/// used when the checksum only covers a prefix (e.g. the first `SKIP` bytes
/// of a compressed block) and the rest is appended incrementally.
pub fn crc32c_append(crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, data)
}

/// Number of leading bytes of a compressed block that are always stored
/// uncompressed and are the only bytes checksummed.
pub const SKIP: usize = 64;

/// Computes the checksum used by the block manager for a block payload,
/// honoring the `data_checksum` toggle from the block manager's `write`
/// operation: the whole aligned payload when `true`, otherwise only the first
/// [`SKIP`] bytes (or the whole buffer if shorter).
pub fn block_checksum(payload: &[u8], data_checksum: bool) -> u32 {
    if data_checksum || payload.len() <= SKIP {
        crc32c(payload)
    } else {
        crc32c(&payload[..SKIP])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // CRC32C("123456789") == 0xE3069283, the standard check value for
        // the Castagnoli polynomial.
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn block_checksum_respects_skip_window() {
        let mut payload = vec![0u8; 128];
        payload[SKIP] = 0xFF; // flip a byte outside the checksummed window
        let full = block_checksum(&payload, true);
        let partial = block_checksum(&payload, false);
        payload[SKIP] = 0x00;
        let partial_before_flip = block_checksum(&payload, false);
        assert_ne!(full, block_checksum(&{
            let mut p = payload.clone();
            p[SKIP] = 0xFF;
            p
        }, true));
        assert_eq!(partial, partial_before_flip);
    }
}

//! Per-block on-disk header: the fixed preamble written ahead of
//! every block's (possibly compressed/encrypted) payload.

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Flags recorded in the block header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        const COMPRESSED = 0b0000_0001;
        const ENCRYPTED  = 0b0000_0010;
    }
}

/// Length of the on-disk block header, written immediately before a block's
/// (possibly transformed) payload.
pub const BLOCK_HEADER_LEN: usize = 16;

/// Fixed-size preamble describing a single on-disk block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Length of the block on disk, payload plus header, allocation-size aligned.
    pub disk_size: u32,
    /// Uncompressed/unencrypted payload length, needed to size the decode buffer.
    pub orig_size: u32,
    pub checksum: u32,
    pub flags: BlockFlags,
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut out = [0u8; BLOCK_HEADER_LEN];
        out[0..4].copy_from_slice(&self.disk_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.orig_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        out[12] = self.flags.bits();
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_LEN {
            return Err(Error::CorruptFile("block header truncated".into()));
        }
        let disk_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let orig_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let flags = BlockFlags::from_bits(buf[12])
            .ok_or_else(|| Error::CorruptFile("block header has unknown flag bits set".into()))?;
        Ok(Self {
            disk_size,
            orig_size,
            checksum,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = BlockHeader {
            disk_size: 4096,
            orig_size: 8192,
            checksum: 0xdead_beef,
            flags: BlockFlags::COMPRESSED | BlockFlags::ENCRYPTED,
        };
        let bytes = h.encode();
        let back = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn rejects_unknown_flag_bits() {
        let mut bytes = BlockHeader {
            disk_size: 1,
            orig_size: 1,
            checksum: 0,
            flags: BlockFlags::empty(),
        }
        .encode();
        bytes[12] = 0b1000_0000;
        assert!(BlockHeader::decode(&bytes).is_err());
    }
}

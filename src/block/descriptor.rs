//! File descriptor block: the fixed-layout header written once per file at
//! offset zero, plus the 128-byte salvage-hint region (grounded in
//! `block.h`'s `__wt_salvage_cookie`).

use crate::error::{Error, Result};

/// Magic number identifying a WiredTiger-style block-manager file.
pub const WT_BLOCK_MAGIC: u32 = 0x101064;
pub const WT_BLOCK_MAJOR_VERSION: u16 = 1;
pub const WT_BLOCK_MINOR_VERSION: u16 = 0;

/// Size in bytes of the descriptor block's fixed region (magic, versions,
/// allocation size, checksum) plus the salvage-hint region that follows it.
pub const DESCRIPTOR_LEN: usize = 64;
pub const SALVAGE_HINT_REGION_LEN: usize = 128;

/// One salvage hint: an offset/size pair the descriptor remembers as "likely
/// a valid block" the last time a checkpoint ran, so a damaged extent list
/// can be rebuilt by re-verifying candidates instead of scanning the whole
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalvageHint {
    pub offset: u64,
    pub size: u64,
}

/// The per-file descriptor block, always resident at byte offset zero.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub magic: u32,
    pub major: u16,
    pub minor: u16,
    pub allocation_size: u32,
    /// Bumped every time the descriptor is rewritten; lets salvage prefer
    /// the newest of several candidate descriptor blocks if more than one
    /// is found structurally valid.
    pub generation: u32,
    pub hints: Vec<SalvageHint>,
}

impl Descriptor {
    pub fn new(allocation_size: u32) -> Self {
        Self {
            magic: WT_BLOCK_MAGIC,
            major: WT_BLOCK_MAJOR_VERSION,
            minor: WT_BLOCK_MINOR_VERSION,
            allocation_size,
            generation: 0,
            hints: Vec::new(),
        }
    }

    /// Appends a hint, keeping only the most recent
    /// `SALVAGE_HINT_REGION_LEN / 16` entries (each hint packs to 16 bytes).
    pub fn record_hint(&mut self, offset: u64, size: u64) {
        const MAX_HINTS: usize = SALVAGE_HINT_REGION_LEN / 16;
        self.hints.push(SalvageHint { offset, size });
        if self.hints.len() > MAX_HINTS {
            let overflow = self.hints.len() - MAX_HINTS;
            self.hints.drain(0..overflow);
        }
    }

    /// Serializes to the fixed `DESCRIPTOR_LEN`-byte on-disk layout, the
    /// descriptor block checksum included (covers bytes other than the
    /// checksum field itself).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; DESCRIPTOR_LEN + SALVAGE_HINT_REGION_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.major.to_le_bytes());
        out[6..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.allocation_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.generation.to_le_bytes());
        out[16..18].copy_from_slice(&(self.hints.len() as u16).to_le_bytes());

        let hint_region = &mut out[DESCRIPTOR_LEN..];
        for (i, hint) in self.hints.iter().enumerate() {
            let base = i * 16;
            if base + 16 > hint_region.len() {
                break;
            }
            hint_region[base..base + 8].copy_from_slice(&hint.offset.to_le_bytes());
            hint_region[base + 8..base + 16].copy_from_slice(&hint.size.to_le_bytes());
        }

        let checksum = crate::checksum::crc32c(&out[4..]);
        out[18..22].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parses a descriptor block previously written by [`Descriptor::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DESCRIPTOR_LEN + SALVAGE_HINT_REGION_LEN {
            return Err(Error::CorruptFile("descriptor block truncated".into()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != WT_BLOCK_MAGIC {
            return Err(Error::CorruptFile(format!(
                "bad descriptor magic {magic:#x}, expected {WT_BLOCK_MAGIC:#x}"
            )));
        }
        let checksum = u32::from_le_bytes(buf[18..22].try_into().unwrap());
        let mut verify = buf[4..].to_vec();
        verify[18 - 4..22 - 4].copy_from_slice(&0u32.to_le_bytes());
        let expect = crate::checksum::crc32c(&verify);
        if expect != checksum {
            return Err(Error::CorruptFile("descriptor block checksum mismatch".into()));
        }

        let major = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let minor = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let allocation_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let generation = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let hint_count = u16::from_le_bytes(buf[16..18].try_into().unwrap()) as usize;

        let hint_region = &buf[DESCRIPTOR_LEN..];
        let max_hints = SALVAGE_HINT_REGION_LEN / 16;
        let mut hints = Vec::with_capacity(hint_count.min(max_hints));
        for i in 0..hint_count.min(max_hints) {
            let base = i * 16;
            let offset = u64::from_le_bytes(hint_region[base..base + 8].try_into().unwrap());
            let size = u64::from_le_bytes(hint_region[base + 8..base + 16].try_into().unwrap());
            hints.push(SalvageHint { offset, size });
        }

        Ok(Self {
            magic,
            major,
            minor,
            allocation_size,
            generation,
            hints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_hints() {
        let mut d = Descriptor::new(4096);
        d.record_hint(4096, 8192);
        d.record_hint(12288, 4096);
        d.generation = 3;
        let bytes = d.encode();
        let back = Descriptor::decode(&bytes).unwrap();
        assert_eq!(back.magic, WT_BLOCK_MAGIC);
        assert_eq!(back.allocation_size, 4096);
        assert_eq!(back.generation, 3);
        assert_eq!(back.hints, d.hints);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Descriptor::new(4096).encode();
        bytes[0] = 0xFF;
        assert!(Descriptor::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut bytes = Descriptor::new(4096).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(Descriptor::decode(&bytes).is_err());
    }

    #[test]
    fn hint_region_caps_at_capacity() {
        let mut d = Descriptor::new(4096);
        for i in 0..20u64 {
            d.record_hint(i * 4096, 4096);
        }
        assert!(d.hints.len() <= SALVAGE_HINT_REGION_LEN / 16);
        let bytes = d.encode();
        let back = Descriptor::decode(&bytes).unwrap();
        assert_eq!(back.hints, d.hints);
    }
}

//! Address cookies: the opaque byte strings that name a block on disk.
//!
//! Encoding is WiredTiger's `__wt_vpack_uint`: a one-byte tag giving the
//! number of payload bytes, followed by that many little-endian bytes. The
//! `offset + 1` trick frees zero to mean "sentinel / no block", which is
//! what lets `AddressCookie::NONE` round-trip to a zero-length encoding.

use crate::error::{Error, Result};

/// Largest size in bytes a single block payload may have (`size <=
/// 2^32 - 1024`).
pub const MAX_BLOCK_SIZE: u64 = (u32::MAX as u64) - 1024;

/// Encodes `value` as `[tag:u8][payload: tag bytes, little-endian]`.
pub fn vpack_uint(value: u64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(0);
        return;
    }
    let bytes = value.to_le_bytes();
    let mut n = 8;
    while n > 1 && bytes[n - 1] == 0 {
        n -= 1;
    }
    out.push(n as u8);
    out.extend_from_slice(&bytes[..n]);
}

/// Decodes a value encoded by [`vpack_uint`], returning the value and the
/// number of bytes consumed from `buf`.
pub fn vunpack_uint(buf: &[u8]) -> Result<(u64, usize)> {
    let tag = *buf
        .first()
        .ok_or_else(|| Error::CorruptFile("vpack: truncated tag".into()))? as usize;
    if tag > 8 {
        return Err(Error::CorruptFile("vpack: tag exceeds 8 bytes".into()));
    }
    if buf.len() < 1 + tag {
        return Err(Error::CorruptFile("vpack: truncated payload".into()));
    }
    let mut raw = [0u8; 8];
    raw[..tag].copy_from_slice(&buf[1..1 + tag]);
    Ok((u64::from_le_bytes(raw), 1 + tag))
}

/// Opaque handle naming a block on disk (file-local block manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressCookie {
    pub object_id: u32,
    /// Byte offset in allocation units; `None` is the sentinel ("no block").
    pub offset: Option<u64>,
    /// Size in bytes (a multiple of `allocsize`).
    pub size: u64,
    pub checksum: u32,
}

impl AddressCookie {
    /// The sentinel "no block" cookie.
    pub const NONE: AddressCookie = AddressCookie {
        object_id: 0,
        offset: None,
        size: 0,
        checksum: 0,
    };

    pub fn new(object_id: u32, offset: u64, size: u64, checksum: u32) -> Result<Self> {
        if size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidArgument(format!(
                "block size {size} exceeds maximum {MAX_BLOCK_SIZE}"
            )));
        }
        Ok(Self {
            object_id,
            offset: Some(offset),
            size,
            checksum,
        })
    }

    pub fn is_none(&self) -> bool {
        self.size == 0 && self.offset.is_none()
    }

    /// Validates that `offset` and `size` are both multiples of `allocsize`.
    pub fn check_alignment(&self, allocsize: u64) -> Result<()> {
        if self.is_none() {
            return Ok(());
        }
        let offset = self.offset.unwrap_or(0);
        if offset % allocsize != 0 || self.size % allocsize != 0 {
            return Err(Error::CorruptFile(format!(
                "address cookie offset={offset} size={} not aligned to allocsize={allocsize}",
                self.size
            )));
        }
        Ok(())
    }

    /// Packs the cookie as `vpack(object_id), vpack(offset/allocsize + 1),
    /// vpack(size/allocsize), vpack(checksum)`. The sentinel packs to an
    /// empty byte string.
    pub fn pack(&self, allocsize: u64) -> Result<Vec<u8>> {
        if self.is_none() {
            return Ok(Vec::new());
        }
        let offset = self.offset.unwrap_or(0);
        if allocsize == 0 || offset % allocsize != 0 || self.size % allocsize != 0 {
            return Err(Error::InvalidArgument(
                "address cookie not aligned to allocsize".into(),
            ));
        }
        let offset_units = offset / allocsize;
        let size_units = self.size / allocsize;
        let mut out = Vec::with_capacity(24);
        vpack_uint(self.object_id as u64, &mut out);
        vpack_uint(offset_units + 1, &mut out);
        vpack_uint(size_units, &mut out);
        vpack_uint(self.checksum as u64, &mut out);
        Ok(out)
    }

    /// Unpacks a cookie produced by [`AddressCookie::pack`]. An empty slice
    /// decodes to [`AddressCookie::NONE`].
    pub fn unpack(buf: &[u8], allocsize: u64) -> Result<Self> {
        if buf.is_empty() {
            return Ok(Self::NONE);
        }
        let mut pos = 0;
        let (object_id, n) = vunpack_uint(&buf[pos..])?;
        pos += n;
        let (offset_plus_one, n) = vunpack_uint(&buf[pos..])?;
        pos += n;
        let (size_units, n) = vunpack_uint(&buf[pos..])?;
        pos += n;
        let (checksum, n) = vunpack_uint(&buf[pos..])?;
        pos += n;
        let _ = pos;

        if size_units == 0 {
            return Ok(Self::NONE);
        }
        let offset_units = offset_plus_one
            .checked_sub(1)
            .ok_or_else(|| Error::CorruptFile("address cookie offset underflow".into()))?;
        Ok(Self {
            object_id: object_id as u32,
            offset: Some(offset_units * allocsize),
            size: size_units * allocsize,
            checksum: checksum as u32,
        })
    }

    /// Hex-dump debug rendering of the packed cookie, in the style of
    /// WiredTiger's `__wt_block_addr_string`.
    pub fn addr_string(&self, allocsize: u64) -> String {
        if self.is_none() {
            return "[NONE]".to_string();
        }
        match self.pack(allocsize) {
            Ok(packed) => format!(
                "[object {}, offset {}, size {}, checksum {:#010x}: {}]",
                self.object_id,
                self.offset.unwrap_or(0),
                self.size,
                self.checksum,
                hex::encode(packed)
            ),
            Err(_) => format!(
                "[object {}, offset {}, size {}, checksum {:#010x}: unalignable]",
                self.object_id,
                self.offset.unwrap_or(0),
                self.size,
                self.checksum
            ),
        }
    }
}

/// Disaggregated address cookie for an object-store backend. Only the data
/// model is implemented; no disaggregated block manager exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisaggregatedAddr {
    pub page_id: u64,
    pub checkpoint_id: u64,
    pub reconciliation_id: u64,
    pub size: u32,
    pub checksum: u32,
}

impl DisaggregatedAddr {
    pub const INVALID: u64 = u64::MAX;

    pub fn is_none(&self) -> bool {
        self.page_id == Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sentinel_packs_empty() {
        let cookie = AddressCookie::NONE;
        let packed = cookie.pack(4096).unwrap();
        assert!(packed.is_empty());
        let back = AddressCookie::unpack(&packed, 4096).unwrap();
        assert_eq!(back, AddressCookie::NONE);
    }

    #[test]
    fn addr_string_sentinel_is_none() {
        assert_eq!(AddressCookie::NONE.addr_string(4096), "[NONE]");
    }

    #[test]
    fn addr_string_embeds_hex_of_packed_cookie() {
        let cookie = AddressCookie::new(0, 4096, 512, 0xdead_beef).unwrap();
        let rendered = cookie.addr_string(512);
        let packed = cookie.pack(512).unwrap();
        assert!(rendered.contains(&hex::encode(packed)));
    }

    #[test]
    fn vpack_roundtrip_examples() {
        for v in [0u64, 1, 255, 256, 65535, 65536, u32::MAX as u64, u64::MAX] {
            let mut out = Vec::new();
            vpack_uint(v, &mut out);
            let (decoded, n) = vunpack_uint(&out).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(n, out.len());
        }
    }

    proptest! {
        #[test]
        fn cookie_roundtrip(off_units in 0u64..100000, size_units in 1u64..100000, checksum: u32, object_id: u32) {
            let allocsize = 512u64;
            let size = size_units * allocsize;
            prop_assume!(size <= MAX_BLOCK_SIZE);
            let cookie = AddressCookie {
                object_id,
                offset: Some(off_units * allocsize),
                size,
                checksum,
            };
            let packed = cookie.pack(allocsize).unwrap();
            let back = AddressCookie::unpack(&packed, allocsize).unwrap();
            prop_assert_eq!(back, cookie);
        }
    }
}

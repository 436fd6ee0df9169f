//! On-disk cell encoding for row-store leaf and internal pages.
//!
//! Each cell is a one-byte tag followed by a tag-specific payload. Keys use
//! `KEY`/`KEY_PFX`/`KEY_SHORT`/`KEY_OVFL`; values use
//! `VALUE`/`VALUE_COPY`/`VALUE_OVFL`/`DEL`; internal pages use the `ADDR_*`
//! family to point at children.

use crate::block::addr::{vpack_uint, vunpack_uint};
use crate::error::{Error, Result};

/// Cell tag byte. Values chosen arbitrarily (this is not wire-compatible
/// with any other system); what matters is the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellTag {
    Key = 1,
    KeyPfx = 2,
    KeyShort = 3,
    KeyOvfl = 4,
    Value = 5,
    ValueCopy = 6,
    ValueOvfl = 7,
    Del = 8,
    AddrInt = 9,
    AddrLeaf = 10,
    AddrLeafNo = 11,
    AddrDel = 12,
}

impl CellTag {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            1 => CellTag::Key,
            2 => CellTag::KeyPfx,
            3 => CellTag::KeyShort,
            4 => CellTag::KeyOvfl,
            5 => CellTag::Value,
            6 => CellTag::ValueCopy,
            7 => CellTag::ValueOvfl,
            8 => CellTag::Del,
            9 => CellTag::AddrInt,
            10 => CellTag::AddrLeaf,
            11 => CellTag::AddrLeafNo,
            12 => CellTag::AddrDel,
            other => return Err(Error::CorruptFile(format!("unknown cell tag {other}"))),
        })
    }
}

/// A decoded cell. Owns its payload bytes (the page image outlives parsing
/// in this port; no zero-copy borrow from the raw buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// A key with no prefix compression applied.
    Key(Vec<u8>),
    /// A key that shares `prefix_len` leading bytes with the previous key;
    /// `suffix` is the remainder.
    KeyPfx { prefix_len: u8, suffix: Vec<u8> },
    /// A short key stored verbatim (reserved for very small keys where
    /// prefix compression would not help); functionally identical to `Key`.
    KeyShort(Vec<u8>),
    /// A key stored in a separate overflow block.
    KeyOvfl(crate::block::addr::AddressCookie),
    Value(Vec<u8>),
    /// A value identical to the value of the preceding slot (deduplication).
    ValueCopy,
    ValueOvfl(crate::block::addr::AddressCookie),
    /// Variable-length column-store deletion marker.
    Del,
    AddrInt(crate::block::addr::AddressCookie),
    AddrLeaf(crate::block::addr::AddressCookie),
    /// Internal-page child whose subtree references no overflow blocks,
    /// letting reconciliation skip the overflow-reuse scan for that subtree.
    AddrLeafNo(crate::block::addr::AddressCookie),
    AddrDel(crate::block::addr::AddressCookie),
}

impl Cell {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Cell::Key(k) => {
                out.push(CellTag::Key as u8);
                vpack_uint(k.len() as u64, out);
                out.extend_from_slice(k);
            }
            Cell::KeyPfx { prefix_len, suffix } => {
                out.push(CellTag::KeyPfx as u8);
                out.push(*prefix_len);
                vpack_uint(suffix.len() as u64, out);
                out.extend_from_slice(suffix);
            }
            Cell::KeyShort(k) => {
                out.push(CellTag::KeyShort as u8);
                vpack_uint(k.len() as u64, out);
                out.extend_from_slice(k);
            }
            Cell::KeyOvfl(addr) => {
                out.push(CellTag::KeyOvfl as u8);
                encode_addr(addr, out);
            }
            Cell::Value(v) => {
                out.push(CellTag::Value as u8);
                vpack_uint(v.len() as u64, out);
                out.extend_from_slice(v);
            }
            Cell::ValueCopy => {
                out.push(CellTag::ValueCopy as u8);
            }
            Cell::ValueOvfl(addr) => {
                out.push(CellTag::ValueOvfl as u8);
                encode_addr(addr, out);
            }
            Cell::Del => {
                out.push(CellTag::Del as u8);
            }
            Cell::AddrInt(addr) => {
                out.push(CellTag::AddrInt as u8);
                encode_addr(addr, out);
            }
            Cell::AddrLeaf(addr) => {
                out.push(CellTag::AddrLeaf as u8);
                encode_addr(addr, out);
            }
            Cell::AddrLeafNo(addr) => {
                out.push(CellTag::AddrLeafNo as u8);
                encode_addr(addr, out);
            }
            Cell::AddrDel(addr) => {
                out.push(CellTag::AddrDel as u8);
                encode_addr(addr, out);
            }
        }
    }

    /// Decodes one cell starting at `buf[0]`, returning it and the number of
    /// bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let tag = CellTag::from_u8(*buf.first().ok_or_else(|| Error::CorruptFile("empty cell buffer".into()))?)?;
        let mut pos = 1;
        let cell = match tag {
            CellTag::Key | CellTag::KeyShort => {
                let (len, n) = vunpack_uint(&buf[pos..])?;
                pos += n;
                let len = len as usize;
                let bytes = read_bytes(buf, pos, len)?;
                pos += len;
                if tag == CellTag::Key {
                    Cell::Key(bytes)
                } else {
                    Cell::KeyShort(bytes)
                }
            }
            CellTag::KeyPfx => {
                let prefix_len = *buf
                    .get(pos)
                    .ok_or_else(|| Error::CorruptFile("truncated KEY_PFX cell".into()))?;
                pos += 1;
                let (len, n) = vunpack_uint(&buf[pos..])?;
                pos += n;
                let suffix = read_bytes(buf, pos, len as usize)?;
                pos += len as usize;
                Cell::KeyPfx { prefix_len, suffix }
            }
            CellTag::KeyOvfl => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::KeyOvfl(addr)
            }
            CellTag::Value => {
                let (len, n) = vunpack_uint(&buf[pos..])?;
                pos += n;
                let bytes = read_bytes(buf, pos, len as usize)?;
                pos += len as usize;
                Cell::Value(bytes)
            }
            CellTag::ValueCopy => Cell::ValueCopy,
            CellTag::ValueOvfl => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::ValueOvfl(addr)
            }
            CellTag::Del => Cell::Del,
            CellTag::AddrInt => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::AddrInt(addr)
            }
            CellTag::AddrLeaf => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::AddrLeaf(addr)
            }
            CellTag::AddrLeafNo => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::AddrLeafNo(addr)
            }
            CellTag::AddrDel => {
                let (addr, n) = decode_addr(&buf[pos..])?;
                pos += n;
                Cell::AddrDel(addr)
            }
        };
        Ok((cell, pos))
    }

    /// True for any of the `ADDR_*` family (internal-page child pointers).
    pub fn is_addr(&self) -> bool {
        matches!(
            self,
            Cell::AddrInt(_) | Cell::AddrLeaf(_) | Cell::AddrLeafNo(_) | Cell::AddrDel(_)
        )
    }
}

fn encode_addr(addr: &crate::block::addr::AddressCookie, out: &mut Vec<u8>) {
    vpack_uint(addr.object_id as u64, out);
    vpack_uint(addr.offset.map(|o| o + 1).unwrap_or(0), out);
    vpack_uint(addr.size, out);
    vpack_uint(addr.checksum as u64, out);
}

fn decode_addr(buf: &[u8]) -> Result<(crate::block::addr::AddressCookie, usize)> {
    let mut pos = 0;
    let (object_id, n) = vunpack_uint(&buf[pos..])?;
    pos += n;
    let (offset_plus_one, n) = vunpack_uint(&buf[pos..])?;
    pos += n;
    let (size, n) = vunpack_uint(&buf[pos..])?;
    pos += n;
    let (checksum, n) = vunpack_uint(&buf[pos..])?;
    pos += n;
    let addr = crate::block::addr::AddressCookie {
        object_id: object_id as u32,
        offset: offset_plus_one.checked_sub(1),
        size,
        checksum: checksum as u32,
    };
    Ok((addr, pos))
}

fn read_bytes(buf: &[u8], pos: usize, len: usize) -> Result<Vec<u8>> {
    buf.get(pos..pos + len)
        .map(|s| s.to_vec())
        .ok_or_else(|| Error::CorruptFile("cell payload truncated".into()))
}

/// Applies prefix compression between two adjacent keys: returns the shared
/// prefix length (capped at 255) and the remaining suffix of `key`.
pub fn prefix_compress(prev: &[u8], key: &[u8]) -> (u8, Vec<u8>) {
    let max = prev.len().min(key.len()).min(255);
    let mut n = 0;
    while n < max && prev[n] == key[n] {
        n += 1;
    }
    (n as u8, key[n..].to_vec())
}

/// Reverses [`prefix_compress`].
pub fn prefix_expand(prev: &[u8], prefix_len: u8, suffix: &[u8]) -> Result<Vec<u8>> {
    let n = prefix_len as usize;
    if n > prev.len() {
        return Err(Error::CorruptFile("prefix length exceeds previous key length".into()));
    }
    let mut out = Vec::with_capacity(n + suffix.len());
    out.extend_from_slice(&prev[..n]);
    out.extend_from_slice(suffix);
    Ok(out)
}

//! Write-ahead / commit log.
//!
//! Keeps the slot-consolidation *interface* (reserve a range, write it, wake
//! waiters once durable) but backs it with a single `parking_lot::Mutex`-
//! guarded append rather than true lock-free slot reservation, since the
//! engine is not expected to run enough concurrent logging threads in this
//! embedding for contention on one mutex to matter: an append-only record
//! stream, fsync-on-commit, LSN bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::checksum::crc32c;
use crate::error::{Error, Result};
use crate::fs::{FileHandle, Filesystem};
use crate::txn::timestamp::Timestamp;

/// A log sequence number: `(file_id, offset)`, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Lsn {
    pub file_id: u32,
    pub offset: u64,
}

impl Lsn {
    pub const ZERO: Lsn = Lsn { file_id: 0, offset: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Checkpoint,
    Commit,
    FileSync,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpType {
    ColPut { recno: u64, value: Vec<u8> },
    ColRemove { recno: u64 },
    ColTruncate { start: u64, stop: u64 },
    RowPut { key: Vec<u8>, value: Vec<u8> },
    RowRemove { key: Vec<u8> },
    RowTruncate { start: Vec<u8>, stop: Vec<u8> },
    TxnTimestamp { commit_ts: Timestamp, durable_ts: Timestamp },
}

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub ops: Vec<OpType>,
}

fn record_type_tag(t: RecordType) -> u8 {
    match t {
        RecordType::Checkpoint => 1,
        RecordType::Commit => 2,
        RecordType::FileSync => 3,
        RecordType::Message => 4,
    }
}

fn record_type_from_tag(tag: u8) -> Result<RecordType> {
    Ok(match tag {
        1 => RecordType::Checkpoint,
        2 => RecordType::Commit,
        3 => RecordType::FileSync,
        4 => RecordType::Message,
        other => return Err(Error::CorruptFile(format!("unknown log record type {other}"))),
    })
}

fn encode_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
    buf.extend_from_slice(b);
}

fn decode_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    if *pos + 4 > buf.len() {
        return Err(Error::CorruptFile("log record truncated (length prefix)".into()));
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if *pos + len > buf.len() {
        return Err(Error::CorruptFile("log record truncated (payload)".into()));
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

impl Record {
    fn encode_ops(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            match op {
                OpType::ColPut { recno, value } => {
                    buf.push(1);
                    buf.extend_from_slice(&recno.to_le_bytes());
                    encode_bytes(buf, value);
                }
                OpType::ColRemove { recno } => {
                    buf.push(2);
                    buf.extend_from_slice(&recno.to_le_bytes());
                }
                OpType::ColTruncate { start, stop } => {
                    buf.push(3);
                    buf.extend_from_slice(&start.to_le_bytes());
                    buf.extend_from_slice(&stop.to_le_bytes());
                }
                OpType::RowPut { key, value } => {
                    buf.push(4);
                    encode_bytes(buf, key);
                    encode_bytes(buf, value);
                }
                OpType::RowRemove { key } => {
                    buf.push(5);
                    encode_bytes(buf, key);
                }
                OpType::RowTruncate { start, stop } => {
                    buf.push(6);
                    encode_bytes(buf, start);
                    encode_bytes(buf, stop);
                }
                OpType::TxnTimestamp { commit_ts, durable_ts } => {
                    buf.push(7);
                    buf.extend_from_slice(&commit_ts.0.to_le_bytes());
                    buf.extend_from_slice(&durable_ts.0.to_le_bytes());
                }
            }
        }
    }

    /// Encodes the full record: `{len, checksum, flags, unused, record body}`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(record_type_tag(self.record_type));
        self.encode_ops(&mut body);

        let checksum = crc32c(&body);
        let mut out = Vec::with_capacity(16 + body.len());
        out.extend_from_slice(&((body.len() as u32) + 16).to_le_bytes());
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // flags, unused today
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 16 {
            return Err(Error::CorruptFile("log record header truncated".into()));
        }
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let checksum = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if buf.len() < len {
            return Err(Error::CorruptFile("log record truncated".into()));
        }
        let body = &buf[16..len];
        if crc32c(body) != checksum {
            return Err(Error::CorruptFile("log record checksum mismatch".into()));
        }
        let mut pos = 0;
        let record_type = record_type_from_tag(*body.first().ok_or_else(|| Error::CorruptFile("empty log record body".into()))?)?;
        pos += 1;
        let op_count = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let mut ops = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            let tag = body[pos];
            pos += 1;
            let op = match tag {
                1 => {
                    let recno = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    let value = decode_bytes(body, &mut pos)?;
                    OpType::ColPut { recno, value }
                }
                2 => {
                    let recno = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    OpType::ColRemove { recno }
                }
                3 => {
                    let start = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    let stop = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    OpType::ColTruncate { start, stop }
                }
                4 => {
                    let key = decode_bytes(body, &mut pos)?;
                    let value = decode_bytes(body, &mut pos)?;
                    OpType::RowPut { key, value }
                }
                5 => {
                    let key = decode_bytes(body, &mut pos)?;
                    OpType::RowRemove { key }
                }
                6 => {
                    let start = decode_bytes(body, &mut pos)?;
                    let stop = decode_bytes(body, &mut pos)?;
                    OpType::RowTruncate { start, stop }
                }
                7 => {
                    let commit_ts = Timestamp(u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap()));
                    pos += 8;
                    let durable_ts = Timestamp(u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap()));
                    pos += 8;
                    OpType::TxnTimestamp { commit_ts, durable_ts }
                }
                other => return Err(Error::CorruptFile(format!("unknown log op type {other}"))),
            };
            ops.push(op);
        }
        Ok((Record { record_type, ops }, len))
    }
}

/// Append-only log over one file.
pub struct Log<FS: Filesystem> {
    handle: FS::Handle,
    file_id: u32,
    write_lock: Mutex<()>,
    end_offset: AtomicU64,
}

impl<FS: Filesystem> Log<FS> {
    pub fn create(fs: &FS, path: &std::path::Path, file_id: u32) -> Result<Self> {
        let handle = fs.open(path, true)?;
        Ok(Self {
            handle,
            file_id,
            write_lock: Mutex::new(()),
            end_offset: AtomicU64::new(0),
        })
    }

    /// Appends `record`, fsyncs, and returns the LSN of the appended record;
    /// the fsync is what makes the record durable before any waiter on that
    /// range is woken.
    pub fn append(&self, record: &Record) -> Result<Lsn> {
        let _guard = self.write_lock.lock();
        let bytes = record.encode();
        let offset = self.end_offset.load(Ordering::Acquire);
        self.handle.extend(offset + bytes.len() as u64)?;
        self.handle.write_at(offset, &bytes)?;
        self.handle.fsync()?;
        self.end_offset.store(offset + bytes.len() as u64, Ordering::Release);
        trace!(offset, len = bytes.len(), "appended log record");
        Ok(Lsn { file_id: self.file_id, offset })
    }

    /// Replays every record from the start of the file, used at open/crash
    /// recovery.
    pub fn replay(&self) -> Result<Vec<(Lsn, Record)>> {
        let total = self.end_offset.load(Ordering::Acquire);
        let mut out = Vec::new();
        let mut offset = 0u64;
        while offset < total {
            let mut header = [0u8; 16];
            self.handle.read_at(offset, &mut header)?;
            let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
            let mut full = vec![0u8; len];
            self.handle.read_at(offset, &mut full)?;
            let (record, consumed) = Record::decode(&full)?;
            out.push((Lsn { file_id: self.file_id, offset }, record));
            offset += consumed as u64;
        }
        Ok(out)
    }
}

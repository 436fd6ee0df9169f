//! Filesystem abstraction.
//!
//! A thin positional-I/O layer over [`std::fs::File`], with the
//! aligned-buffer and retry/backoff behavior the block manager depends on.
//! Kept as a trait so tests can swap in an in-memory filesystem without
//! touching disk.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

use crate::error::{Error, Result};

/// Default I/O alignment for `O_DIRECT`-capable configurations. The engine
/// does not actually open files `O_DIRECT` (that is a platform-specific,
/// opt-in detail this port does not attempt), but buffers are still sized as
/// multiples of this constant so a future direct-I/O path is a drop-in.
pub const BUFFER_ALIGNMENT: usize = 4096;

const RETRY_ATTEMPTS: u32 = 10;
const RETRY_SLEEP: Duration = Duration::from_millis(50);

/// Handle to an open file, addressed by positional reads/writes.
pub trait FileHandle: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;
    fn size(&self) -> Result<u64>;
    /// Extend the file to at least `new_len` bytes, zero-filled.
    fn extend(&self, new_len: u64) -> Result<()>;
    fn truncate(&self, new_len: u64) -> Result<()>;
    fn fsync(&self) -> Result<()>;
}

/// Filesystem contract used by the block manager and WAL. Implementations
/// must retry the transient errno classes internally; callers never see
/// `EAGAIN`/`EINTR`/etc. bubble up as a permanent failure.
pub trait Filesystem: Send + Sync {
    type Handle: FileHandle;

    fn open(&self, path: &Path, create: bool) -> Result<Self::Handle>;
    fn remove(&self, path: &Path, durable: bool) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    /// Atomically rename `from` to `to`, replacing any existing file at `to`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::Other
            | ErrorKind::TimedOut
            | ErrorKind::OutOfMemory
    ) || err.raw_os_error().map_or(false, |code| {
        // ENOSPC/EMFILE/ENFILE/EBUSY/EIO are not given dedicated ErrorKind
        // variants on every platform; fall back to the raw errno on unix.
        #[cfg(unix)]
        {
            matches!(code, libc_enospc::ENOSPC | libc_enospc::EBUSY | libc_enospc::EIO | libc_enospc::EMFILE | libc_enospc::ENFILE)
        }
        #[cfg(not(unix))]
        {
            let _ = code;
            false
        }
    })
}

// Avoid a dependency on the `libc` crate purely for four errno constants:
// these numeric values are stable across Linux/macOS/BSD.
#[cfg(unix)]
#[allow(dead_code)]
mod libc_enospc {
    pub const ENOSPC: i32 = 28;
    pub const EBUSY: i32 = 16;
    pub const EIO: i32 = 5;
    pub const EMFILE: i32 = 24;
    pub const ENFILE: i32 = 23;
}

fn with_retry<T>(mut op: impl FnMut() -> io::Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_retryable(&e) && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                thread::sleep(RETRY_SLEEP);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Real filesystem, backed by `std::fs`.
#[derive(Debug, Default)]
pub struct OsFilesystem;

pub struct OsFileHandle {
    file: File,
    path: PathBuf,
}

impl FileHandle for OsFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        with_retry(|| {
            #[cfg(unix)]
            {
                self.file.read_exact_at(buf, offset)
            }
            #[cfg(windows)]
            {
                let mut read = 0usize;
                while read < buf.len() {
                    let n = self.file.seek_read(&mut buf[read..], offset + read as u64)?;
                    if n == 0 {
                        return Err(io::Error::new(ErrorKind::UnexpectedEof, "short read"));
                    }
                    read += n;
                }
                Ok(())
            }
        })
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        with_retry(|| {
            #[cfg(unix)]
            {
                self.file.write_all_at(buf, offset)
            }
            #[cfg(windows)]
            {
                let mut written = 0usize;
                while written < buf.len() {
                    let n = self
                        .file
                        .seek_write(&buf[written..], offset + written as u64)?;
                    written += n;
                }
                Ok(())
            }
        })
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn extend(&self, new_len: u64) -> Result<()> {
        // A real fallocate(2) call would avoid allocating the backing extents
        // lazily; `set_len` is the safe-Rust equivalent this port uses
        // instead, since `unsafe_code = "deny"` rules out the raw
        // libc::fallocate call that would otherwise be preferred here.
        with_retry(|| {
            let current = self.file.metadata()?.len();
            if new_len > current {
                self.file.set_len(new_len)?;
            }
            Ok(())
        })
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        with_retry(|| self.file.set_len(new_len))
    }

    fn fsync(&self) -> Result<()> {
        with_retry(|| self.file.sync_all())?;
        fsync_parent_dir(&self.path)
    }
}

fn fsync_parent_dir(path: &Path) -> Result<()> {
    // Directory-fsync barrier: required on Linux for `create`/`rename`
    // durability, a no-op effectively everywhere directory handles cannot be
    // opened for read (older Windows filesystems).
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

impl Filesystem for OsFilesystem {
    type Handle = OsFileHandle;

    fn open(&self, path: &Path, create: bool) -> Result<Self::Handle> {
        let file = with_retry(|| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(create)
                .truncate(false)
                .open(path)
        })?;
        if create {
            fsync_parent_dir(path)?;
        }
        Ok(OsFileHandle {
            file,
            path: path.to_path_buf(),
        })
    }

    fn remove(&self, path: &Path, durable: bool) -> Result<()> {
        with_retry(|| std::fs::remove_file(path))?;
        if durable {
            fsync_parent_dir(path)?;
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        with_retry(|| std::fs::rename(from, to))?;
        fsync_parent_dir(to)
    }
}

/// In-memory filesystem for tests: avoids disk I/O entirely while keeping
/// the same retry-free happy path behavior real files exhibit.
#[derive(Default)]
pub struct MemFilesystem {
    files: parking_lot::Mutex<HashMap<PathBuf, ()>>,
}

pub struct MemFileHandle {
    data: parking_lot::Mutex<Vec<u8>>,
}

impl FileHandle for MemFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let off = offset as usize;
        if off + buf.len() > data.len() {
            return Err(Error::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of in-memory file",
            )));
        }
        buf.copy_from_slice(&data[off..off + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let off = offset as usize;
        if off + buf.len() > data.len() {
            data.resize(off + buf.len(), 0);
        }
        data[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn extend(&self, new_len: u64) -> Result<()> {
        let mut data = self.data.lock();
        if new_len as usize > data.len() {
            data.resize(new_len as usize, 0);
        }
        Ok(())
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.data.lock().truncate(new_len as usize);
        Ok(())
    }

    fn fsync(&self) -> Result<()> {
        Ok(())
    }
}

impl Filesystem for MemFilesystem {
    type Handle = std::sync::Arc<MemFileHandle>;

    fn open(&self, path: &Path, _create: bool) -> Result<Self::Handle> {
        self.files.lock().insert(path.to_path_buf(), ());
        Ok(std::sync::Arc::new(MemFileHandle {
            data: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    fn remove(&self, path: &Path, _durable: bool) -> Result<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock();
        if files.remove(from).is_some() {
            files.insert(to.to_path_buf(), ());
        }
        Ok(())
    }
}

impl FileHandle for std::sync::Arc<MemFileHandle> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_at(offset, buf)
    }
    fn size(&self) -> Result<u64> {
        (**self).size()
    }
    fn extend(&self, new_len: u64) -> Result<()> {
        (**self).extend(new_len)
    }
    fn truncate(&self, new_len: u64) -> Result<()> {
        (**self).truncate(new_len)
    }
    fn fsync(&self) -> Result<()> {
        (**self).fsync()
    }
}

/// Round `len` up to the next multiple of `align`.
pub fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_fs_read_write_roundtrip() {
        let fs = MemFilesystem::default();
        let h = fs.open(Path::new("/x"), true).unwrap();
        h.extend(4096).unwrap();
        h.write_at(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        h.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(h.size().unwrap(), 4096);
    }

    #[test]
    fn align_up_rounds_correctly() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}

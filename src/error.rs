//! Error taxonomy shared by every layer of the engine.
//!
//! Transient errors the caller is expected to retry, positional errors
//! consumed locally by cursors, semantic/integrity errors that are fatal to
//! the operation (or, for [`Error::DataCorruption`], to the whole
//! connection), and opaque I/O passthrough.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// MVCC write-write conflict; the caller must retry its whole transaction.
    #[error("conflict between concurrent transactions")]
    Rollback,

    /// A read or write touched a key a prepared-but-unresolved transaction holds.
    #[error("prepared transaction conflict")]
    PrepareConflict,

    /// Advisory: cache is above the hard trigger and the caller should back off.
    #[error("cache is full")]
    CacheFull,

    /// A resource is transiently locked by another thread.
    #[error("resource busy")]
    Busy,

    /// Positional: cursor has no item at the requested position.
    #[error("no such key")]
    NotFound,

    /// Positional: insert found an existing key where none was expected.
    #[error("key already exists")]
    DuplicateKey,

    /// Semantic: a caller-supplied argument is out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Semantic: the requested operation is not implemented by this build.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Integrity-fatal: a checksum or structural invariant failed.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// Integrity-fatal and connection-wide: further operations must fail.
    #[error("data corruption detected, connection poisoned: {0}")]
    DataCorruption(String),

    /// System error passthrough.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fatal runtime condition. Aborts in debug builds (see [`panic_or_err`]).
    #[error("panic: {0}")]
    Panic(String),
}

impl Error {
    /// True for the transient kinds a caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Rollback | Error::PrepareConflict | Error::CacheFull | Error::Busy
        )
    }
}

/// Raises a fatal runtime condition: aborts in debug builds, returns an error
/// (poisoning the connection) in release builds.
pub fn panic_or_err(msg: impl Into<String>) -> Error {
    let msg = msg.into();
    if cfg!(debug_assertions) {
        panic!("wt-core PANIC: {msg}");
    }
    Error::Panic(msg)
}

/// Process-wide latch set once an [`Error::DataCorruption`] has been
/// observed; every subsequent public call must check it and fail fast
/// rather than touch a possibly-inconsistent file.
#[derive(Debug, Default)]
pub struct PoisonFlag(AtomicBool);

impl PoisonFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn poison(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_poisoned(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(Error::DataCorruption(
                "connection poisoned by a prior corruption error".into(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Locks `mutex`, mapping poisoning (a panic while the guard was held) onto
/// [`Error::DataCorruption`] rather than propagating the panic.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("mutex poisoned - a prior holder panicked while locked");
        Error::DataCorruption("lock poisoned".into())
    })
}

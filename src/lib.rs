//! # wt-core
//!
//! An embeddable, page-oriented B-tree storage engine: MVCC transactions
//! over a row-store B-tree, a block-managed on-disk file format, and a
//! cache with cooperative eviction.
//!
//! This crate implements the core storage engine only — the part that
//! allocates bytes in a file, serializes B-tree pages into and out of them,
//! and arbitrates concurrent readers/writers/eviction/checkpoint against
//! those pages. It does not implement a query language, a CLI, schema
//! management, or tiered/cloud object storage.
//!
//! ## Layout
//!
//! - [`fs`] — positional file I/O with retry/backoff.
//! - [`checksum`], [`codec`] — CRC32C and the compress/encrypt pipeline
//!   applied at block boundaries.
//! - [`block`] — address cookies, the descriptor block, the free-extent
//!   list, and the block manager itself.
//! - [`btree`] — in-memory page representation, cells, update chains, refs,
//!   and per-page insert skip lists.
//! - [`reconcile`] — serializes a dirty page into one or more on-disk block
//!   images.
//! - [`cache`] — memory accounting, normalized-position tree diversification,
//!   the eviction queue, and hazard pointers.
//! - [`cursor`] — positioned search/navigation over one page.
//! - [`txn`] — transaction contexts, visibility, snapshots, timestamp
//!   oracles, and rollback-to-stable.
//! - [`checkpoint`] — the pin/select/sync-reconcile/resolve/release protocol.
//! - [`log`] — the append-only, LSN-ordered commit log.
//! - [`metadata`] — the metadata table and turtle-file bootstrap.
//! - [`config`] — configuration-string parsing.
//! - [`futex`] — the wait/wake primitive condvars are built on.
//! - [`error`] — the crate-wide error taxonomy and `Result` alias.
//!
//! ## Example
//!
//! Writing a block through the block manager and reading it back:
//!
//! ```rust
//! use wt_core::block::BlockManager;
//! use wt_core::codec::Codec;
//! use wt_core::fs::MemFilesystem;
//! use std::path::Path;
//!
//! let fs = MemFilesystem::default();
//! let mgr = BlockManager::create(&fs, Path::new("/db/t.wt"), 512, Codec::default())?;
//! let addr = mgr.write(b"hello, wt-core")?;
//! assert_eq!(mgr.read(&addr)?, b"hello, wt-core");
//! # Ok::<(), wt_core::error::Error>(())
//! ```

pub mod block;
pub mod btree;
pub mod cache;
pub mod checkpoint;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fs;
pub mod futex;
pub mod log;
pub mod metadata;
pub mod reconcile;
pub mod txn;

pub use error::{Error, Result};

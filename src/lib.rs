//! An arena-style string pool.
//!
//! A [`StringPool`] owns one contiguous, growable backing buffer and
//! stores variable-length strings in it, handing out cheap copyable
//! handles instead of pointers. It targets workloads where many
//! short-lived text values would otherwise stress the general-purpose
//! allocator: parsers, caches, message processors.
//!
//! ## Pieces
//!
//! - [`pool::StringPool`]: the public face. Allocate, free, read,
//!   compact-and-grow, metrics.
//! - [`table::AllocId`]: a monotonically increasing, never-reused name
//!   for an allocation. Id 0 is the canonical empty string. Stale ids
//!   are detected, never dereferenced.
//! - [`handle::StrRef`]: a two-word `Copy` handle (pool reference + id)
//!   that resolves reads through the pool.
//! - [`freelist::FreeIndex`]: free extents bucketed by size for best-fit
//!   reuse, with on-demand coalescing of adjacent extents.
//! - [`buffer::PoolBuffer`]: the raw backing region.
//!
//! ## Example
//!
//! ```
//! use strpool::StringPool;
//!
//! let mut pool = StringPool::new(1024, true).unwrap();
//! let id = pool.allocate("hello").unwrap();
//! assert_eq!(pool.read(id).unwrap(), b"hello");
//!
//! let handle = pool.get(id);
//! assert_eq!(handle.as_str().unwrap(), "hello");
//!
//! pool.free(id);
//! assert!(pool.read(id).is_err());
//! pool.free(id); // double-free is a safe no-op
//! ```
//!
//! ## Concurrency
//!
//! The pool is single-writer. Concurrent readers are safe while no
//! mutation is in progress; callers wanting concurrent mutation wrap the
//! pool in their own lock.

pub mod buffer;
pub mod error;
pub mod freelist;
pub mod handle;
pub mod pool;
pub mod table;

pub use error::PoolError;
pub use handle::StrRef;
pub use pool::{PoolStats, StringPool};
pub use table::AllocId;

/// One code unit of the stored text. Strings are kept as UTF-8, so units
/// are bytes.
pub type Unit = u8;

/// Bytes per code unit.
pub const UNIT_BYTES: usize = core::mem::size_of::<Unit>();

/// Allocator alignment: every extent size is a multiple of this, with a
/// floor of one `ALIGN`.
pub const ALIGN: usize = 8;

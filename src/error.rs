use thiserror::Error;

use crate::table::AllocId;

/// Errors surfaced at the pool boundary.
///
/// `free` never reports errors: freeing a stale id or freeing into a
/// disposed pool are both defined as no-ops so that double-free is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A parameter was rejected before any mutation took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The id is not present in the allocation table (and is not the
    /// reserved empty id).
    #[error("allocation {0} is stale or was never issued")]
    StaleId(AllocId),

    /// The backing allocation failed, or the pool is full and growth is
    /// disabled.
    #[error("out of memory: requested {requested} bytes, {available} free")]
    OutOfMemory {
        /// Aligned byte size of the rejected request.
        requested: usize,
        /// Free bytes (tail plus reclaimable extents) at the time of failure.
        available: usize,
    },

    /// The pool has been disposed and its backing region released.
    #[error("pool has been disposed")]
    Disposed,
}

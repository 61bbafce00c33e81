//! The pool coordinator: the public face of the crate.
//!
//! A [`StringPool`] owns one contiguous backing buffer and carves it into
//! variable-length string allocations named by [`AllocId`]s. Placement
//! policy, in order:
//!
//! 1. best-fit from the free-space index, splitting oversized extents;
//! 2. bump allocation from the tail of the buffer;
//! 3. if growth is allowed, compact live allocations into a larger fresh
//!    buffer and bump from its tail;
//! 4. otherwise fail with [`PoolError::OutOfMemory`].
//!
//! Freeing returns the extent to the index; physically adjacent extents
//! are merged lazily, only once fragmentation pressure crosses the
//! thresholds below, so that the common free stays O(log K).
//!
//! The pool is single-writer: every mutating operation takes `&mut self`,
//! and concurrent readers are safe whenever no mutation is in progress.
//! Callers that want concurrent mutation wrap the pool in their own lock.

use log::{debug, trace};
use static_assertions::const_assert;

use crate::buffer::PoolBuffer;
use crate::error::PoolError;
use crate::freelist::{FreeExtent, FreeIndex, FreeStats, Validity};
use crate::handle::StrRef;
use crate::table::{AllocId, AllocTable};
use crate::{Unit, ALIGN, UNIT_BYTES};

/// Coalesce trigger: reclaimable bytes as a percentage of capacity.
pub const FRAG_THRESHOLD_PCT: usize = 35;
/// Coalesce trigger: minimum number of free blocks.
pub const MIN_BLOCKS_TO_COALESCE: usize = 8;
/// Coalesce trigger: minimum frees since the last sweep.
pub const MIN_FREES_BETWEEN_COALESCE: u32 = 10;

/// Largest unit count whose byte size still fits in the size word after
/// worst-case alignment padding.
pub const MAX_SAFE_LEN_UNITS: usize = (usize::MAX - ALIGN + 1) / UNIT_BYTES;

const_assert!(ALIGN.is_power_of_two());
const_assert!(UNIT_BYTES <= ALIGN);

// Round up value to the nearest multiple of ALIGN.
fn round_up(value: usize) -> usize {
    (value + ALIGN - 1) & !(ALIGN - 1)
}

// Aligned byte footprint of an allocation of `len_units`, with the ALIGN
// floor. Allocation and free must agree on this exactly.
fn need_bytes(len_units: usize) -> usize {
    round_up(len_units * UNIT_BYTES).max(ALIGN)
}

/// Point-in-time snapshot of the pool's derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub active_allocations: usize,
    pub capacity_units: usize,
    /// Tail units plus reclaimable units in the free index.
    pub free_space_units: usize,
    /// Units between the bump offset and capacity.
    pub tail_free_units: usize,
    pub free_blocks: usize,
    /// Reclaimable-but-not-yet-reclaimed bytes as a percentage of capacity.
    pub fragmentation_pct: usize,
}

/// An arena-style pool of variable-length strings.
///
/// Created with [`StringPool::new`], destroyed with [`dispose`] (or by
/// dropping it). After dispose, every operation except the idempotent
/// [`free`] fails with [`PoolError::Disposed`].
///
/// [`dispose`]: StringPool::dispose
/// [`free`]: StringPool::free
#[derive(Debug)]
pub struct StringPool {
    /// `None` is the disposed state.
    buf: Option<PoolBuffer>,
    table: AllocTable,
    free: FreeIndex,
    /// First byte past the highest extent ever handed out since the last
    /// compaction; `[bump, capacity)` is the implicit tail free region.
    bump: usize,
    allow_growth: bool,
    frees_since_coalesce: u32,
}

impl StringPool {
    /// Create a pool with room for `initial_units` code units.
    ///
    /// With `allow_growth`, allocations that no longer fit trigger a
    /// compact-and-grow; without it they fail with
    /// [`PoolError::OutOfMemory`].
    pub fn new(initial_units: usize, allow_growth: bool) -> Result<StringPool, PoolError> {
        if initial_units == 0 {
            return Err(PoolError::InvalidArgument("initial capacity must be at least one unit"));
        }
        let capacity_bytes = initial_units
            .checked_mul(UNIT_BYTES)
            .ok_or(PoolError::InvalidArgument("initial capacity overflows the size word"))?;
        let buf = PoolBuffer::allocate(capacity_bytes)?;
        debug!("new pool: {} units ({} bytes), growth {}", initial_units, capacity_bytes, allow_growth);
        Ok(StringPool {
            buf: Some(buf),
            table: AllocTable::new(),
            free: FreeIndex::new(),
            bump: 0,
            allow_growth,
            frees_since_coalesce: 0,
        })
    }

    /// Allocate room for the string and copy it in. Empty input yields
    /// [`AllocId::EMPTY`] without allocating.
    pub fn allocate(&mut self, src: &str) -> Result<AllocId, PoolError> {
        self.allocate_units(src.as_bytes())
    }

    /// Allocate room for `src.len()` code units and copy them in.
    pub fn allocate_units(&mut self, src: &[Unit]) -> Result<AllocId, PoolError> {
        if src.is_empty() {
            return Ok(AllocId::EMPTY);
        }
        let id = self.allocate_raw(src.len())?;
        let record = self.table.lookup(id).expect("freshly registered id");
        self.buf
            .as_mut()
            .expect("allocate_raw succeeded, pool is open")
            .write_at(record.offset, src);
        Ok(id)
    }

    /// Allocate room for `len_units` code units without initializing it.
    /// Contents are unspecified until written through [`write_at`].
    ///
    /// [`write_at`]: StringPool::write_at
    pub fn allocate_raw(&mut self, len_units: usize) -> Result<AllocId, PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        if len_units == 0 {
            return Ok(AllocId::EMPTY);
        }
        if len_units > MAX_SAFE_LEN_UNITS {
            return Err(PoolError::InvalidArgument("length overflows the size word after alignment"));
        }
        let need = need_bytes(len_units);

        if let Some(extent) = self.free.take_fit(need) {
            // Give the tail back if the best fit was oversized.
            let spare = extent.size - need;
            if spare >= ALIGN {
                self.free.insert(FreeExtent {
                    offset: extent.offset + need,
                    size: spare,
                });
            }
            trace!("reused extent at {} for {} bytes ({} spare)", extent.offset, need, spare);
            return Ok(self.table.register(extent.offset, len_units));
        }

        let capacity = self.capacity_bytes();
        if need <= capacity - self.bump {
            let offset = self.bump;
            self.bump += need;
            trace!("bump-allocated {} bytes at {}", need, offset);
            return Ok(self.table.register(offset, len_units));
        }

        if self.allow_growth {
            let additional = need.max(capacity.saturating_add(capacity / 2));
            debug!("pool full ({} of {} bytes used); growing by {}", self.bump, capacity, additional);
            self.compact_and_grow(additional)?;
            // The fresh buffer has at least `need` bytes of tail.
            let offset = self.bump;
            self.bump += need;
            return Ok(self.table.register(offset, len_units));
        }

        Err(PoolError::OutOfMemory {
            requested: need,
            available: capacity - self.bump + self.free.free_bytes(),
        })
    }

    /// Write `src` into a live allocation at `unit_offset`. The write
    /// must stay inside the range originally allocated.
    pub fn write_at(&mut self, id: AllocId, unit_offset: usize, src: &[Unit]) -> Result<(), PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        if id.is_empty_id() {
            return Err(PoolError::InvalidArgument("the empty allocation is not writable"));
        }
        let record = self.table.lookup(id).ok_or(PoolError::StaleId(id))?;
        let end = unit_offset
            .checked_add(src.len())
            .ok_or(PoolError::InvalidArgument("write range overflows the size word"))?;
        if end > record.len_units {
            return Err(PoolError::InvalidArgument("write reaches outside the allocated range"));
        }
        self.buf
            .as_mut()
            .expect("checked above, pool is open")
            .write_at(record.offset + unit_offset * UNIT_BYTES, src);
        Ok(())
    }

    /// Free an allocation. Idempotent: unknown or already-freed ids, the
    /// empty id, and disposed pools are all silent no-ops.
    pub fn free(&mut self, id: AllocId) {
        if self.buf.is_none() || id.is_empty_id() {
            return;
        }
        let record = match self.table.unregister(id) {
            Some(record) => record,
            None => return,
        };
        let size = need_bytes(record.len_units);
        if cfg!(debug_assertions) {
            // Scrub freed storage so stale reads show up in test builds.
            self.buf
                .as_mut()
                .expect("checked above, pool is open")
                .zero_range(record.offset, size);
        }
        self.free.insert(FreeExtent {
            offset: record.offset,
            size,
        });
        self.frees_since_coalesce += 1;
        trace!("freed {} ({} bytes at {})", id, size, record.offset);
        self.maybe_coalesce();
    }

    // Lazy coalesce guard: only sweep once fragmentation pressure, block
    // count, and free churn all cross their thresholds.
    fn maybe_coalesce(&mut self) {
        if self.fragmentation_pct() > FRAG_THRESHOLD_PCT
            && self.free.free_blocks() >= MIN_BLOCKS_TO_COALESCE
            && self.frees_since_coalesce >= MIN_FREES_BETWEEN_COALESCE
        {
            let merges = self.free.coalesce();
            debug!("threshold coalesce: {} merges, {} blocks remain", merges, self.free.free_blocks());
            self.frees_since_coalesce = 0;
        }
    }

    /// Merge all physically adjacent free extents now, regardless of the
    /// lazy trigger. Returns the number of merges.
    pub fn coalesce(&mut self) -> Result<usize, PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        let merges = self.free.coalesce();
        self.frees_since_coalesce = 0;
        Ok(merges)
    }

    /// Defragment live allocations into a fresh buffer `additional_bytes`
    /// larger than the current one. Every live id keeps resolving to its
    /// contents; raw offsets are rewritten and the free index is emptied.
    ///
    /// If the fresh buffer cannot be allocated the pool is left intact.
    pub fn compact_and_grow(&mut self, additional_bytes: usize) -> Result<(), PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        let old_capacity = self.capacity_bytes();
        let new_capacity = old_capacity
            .checked_add(additional_bytes)
            .ok_or(PoolError::InvalidArgument("grown capacity overflows the size word"))?;

        // The only fallible step; the pool is untouched if it fails.
        let mut fresh = PoolBuffer::allocate(new_capacity)?;

        let old = self.buf.take().expect("checked above, pool is open");
        let mut cursor = 0usize;
        for (id, record) in self.table.iter_mut() {
            let len_bytes = record.len_units * UNIT_BYTES;
            fresh.copy_from(&old, record.offset, cursor, len_bytes);
            trace!("compacted {}: {} -> {}", id, record.offset, cursor);
            record.offset = cursor;
            cursor += need_bytes(record.len_units);
        }

        self.bump = cursor;
        self.free.clear();
        self.frees_since_coalesce = 0;
        self.buf = Some(fresh);
        // `old` is released here.
        debug!(
            "compacted {} live allocations into {} of {} bytes",
            self.table.len(),
            cursor,
            new_capacity
        );
        Ok(())
    }

    /// Drop every live allocation and free extent, resetting the buffer
    /// to empty. The id counter is preserved, so ids minted before the
    /// clear can never collide with ids minted after it.
    pub fn clear(&mut self) -> Result<(), PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        self.table.clear();
        self.free.clear();
        self.bump = 0;
        self.frees_since_coalesce = 0;
        debug!("pool cleared");
        Ok(())
    }

    /// Release the backing buffer and mark the pool dead. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(buf) = self.buf.take() {
            drop(buf);
            self.table.clear();
            self.free.clear();
            self.bump = 0;
            debug!("pool disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.buf.is_none()
    }

    /// The stored code units of a live allocation. Id 0 is the canonical
    /// empty string.
    pub fn read(&self, id: AllocId) -> Result<&[Unit], PoolError> {
        let buf = self.buf.as_ref().ok_or(PoolError::Disposed)?;
        if id.is_empty_id() {
            return Ok(&[]);
        }
        let record = self.table.lookup(id).ok_or(PoolError::StaleId(id))?;
        Ok(buf.read_span(record.offset, record.len_units * UNIT_BYTES))
    }

    /// Logical length of an allocation in code units.
    pub fn length_units(&self, id: AllocId) -> Result<usize, PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        self.table
            .lookup(id)
            .map(|record| record.len_units)
            .ok_or(PoolError::StaleId(id))
    }

    /// Whether `id` currently resolves. The empty id always does while
    /// the pool is open.
    pub fn is_live(&self, id: AllocId) -> bool {
        self.buf.is_some() && (id.is_empty_id() || self.table.contains(id))
    }

    /// Current byte offset of a live allocation. Placement is an
    /// implementation detail that compaction rewrites; exposed for
    /// diagnostics and tests only.
    pub fn offset_bytes(&self, id: AllocId) -> Result<usize, PoolError> {
        if self.buf.is_none() {
            return Err(PoolError::Disposed);
        }
        self.table
            .lookup(id)
            .map(|record| record.offset)
            .ok_or(PoolError::StaleId(id))
    }

    /// Mint a copyable handle resolving through this pool.
    pub fn get(&self, id: AllocId) -> StrRef<'_> {
        StrRef::new(self, id)
    }

    pub fn active_allocations(&self) -> usize {
        self.table.len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.capacity())
    }

    pub fn capacity_units(&self) -> usize {
        self.capacity_bytes() / UNIT_BYTES
    }

    /// Tail units plus reclaimable units in the free index.
    pub fn free_space_units(&self) -> usize {
        (self.capacity_bytes() - self.bump + self.free.free_bytes()) / UNIT_BYTES
    }

    /// Units between the bump offset and capacity.
    pub fn tail_free_units(&self) -> usize {
        (self.capacity_bytes() - self.bump) / UNIT_BYTES
    }

    pub fn free_bytes(&self) -> usize {
        self.free.free_bytes()
    }

    pub fn free_blocks(&self) -> usize {
        self.free.free_blocks()
    }

    /// Reclaimable-but-not-yet-reclaimed bytes as a percentage of
    /// capacity. A single large extent and many scattered small ones
    /// contribute alike; this is only consumed by the coalesce guard,
    /// where any monotonic pressure estimate works.
    pub fn fragmentation_pct(&self) -> usize {
        let capacity = self.capacity_bytes();
        if capacity == 0 {
            return 0;
        }
        100 * self.free.free_bytes() / capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active_allocations: self.active_allocations(),
            capacity_units: self.capacity_units(),
            free_space_units: self.free_space_units(),
            tail_free_units: self.tail_free_units(),
            free_blocks: self.free_blocks(),
            fragmentation_pct: self.fragmentation_pct(),
        }
    }

    /// Check the free index for structural damage against the current
    /// bump offset, and gather its stats.
    pub fn audit(&self) -> (Validity, FreeStats) {
        self.free.audit(self.bump)
    }
}

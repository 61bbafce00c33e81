use core::fmt;
use std::collections::BTreeMap;

use log::{debug, trace};

use crate::ALIGN;

/// A free `(offset, size)` region inside the backing buffer.
///
/// Sizes are always multiples of [`ALIGN`] with a floor of [`ALIGN`], and
/// distinct extents never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeExtent {
    pub offset: usize,
    pub size: usize,
}

impl FreeExtent {
    /// One past the last byte of the extent.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Free extents indexed by size for best-fit search.
///
/// Extents live in buckets keyed by their size; the ordered keys give the
/// best-fit lookup, and each bucket behaves as a stack: `find_fit`
/// returns the most recently inserted extent of the smallest qualifying
/// size, which keeps the index shape bounded while allocations churn.
///
/// The tail of the buffer (everything past the bump offset) is tracked by
/// the pool, never by this index.
#[derive(Debug, Default)]
pub struct FreeIndex {
    buckets: BTreeMap<usize, Vec<FreeExtent>>,
    free_bytes: usize,
    free_blocks: usize,
}

/// Invalid states found while auditing a `FreeIndex`.
///
/// Everything here should be zero at all times; `adjacent` extents are
/// not an invalid state (coalescing is lazy) and are reported through
/// [`FreeStats`] instead.
#[derive(Default, Debug)]
pub struct Validity {
    /// Extents overlapping other extents. This indicates corruption.
    pub overlaps: usize,
    /// Extents breaking the alignment contract (misaligned offset or
    /// size, or size below the floor).
    pub misaligned: usize,
    /// Extents reaching past the bump offset they were audited against.
    pub out_of_bounds: usize,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        self.overlaps == 0 && self.misaligned == 0 && self.out_of_bounds == 0
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

#[derive(Default, Debug)]
pub struct FreeStats {
    pub blocks: usize,
    pub bytes: usize,
    /// Physically adjacent extent pairs; zero right after a coalesce.
    pub adjacent_pairs: usize,
}

impl FreeIndex {
    pub fn new() -> FreeIndex {
        FreeIndex::default()
    }

    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    pub fn is_empty(&self) -> bool {
        self.free_blocks == 0
    }

    /// Add an extent to the index.
    pub fn insert(&mut self, extent: FreeExtent) {
        debug_assert!(extent.size >= ALIGN);
        debug_assert!(extent.size % ALIGN == 0);
        debug_assert!(extent.offset % ALIGN == 0);
        self.free_bytes += extent.size;
        self.free_blocks += 1;
        self.buckets.entry(extent.size).or_default().push(extent);
    }

    /// Remove the specific extent, matched on both offset and size.
    /// Returns false if it is not present.
    pub fn remove(&mut self, extent: FreeExtent) -> bool {
        let bucket = match self.buckets.get_mut(&extent.size) {
            Some(bucket) => bucket,
            None => return false,
        };
        // Buckets are stacks; scan from the tail where the match usually is.
        let position = match bucket.iter().rposition(|e| e.offset == extent.offset) {
            Some(position) => position,
            None => return false,
        };
        bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&extent.size);
        }
        self.free_bytes -= extent.size;
        self.free_blocks -= 1;
        true
    }

    /// Best-fit query: the last-inserted extent of the smallest bucket
    /// whose size is at least `size`. Never returns an extent smaller
    /// than requested.
    pub fn find_fit(&self, size: usize) -> Option<FreeExtent> {
        let (_, bucket) = self.buckets.range(size..).next()?;
        bucket.last().copied()
    }

    /// `find_fit` plus removal in one step.
    pub fn take_fit(&mut self, size: usize) -> Option<FreeExtent> {
        let key = match self.buckets.range(size..).next() {
            Some((&key, _)) => key,
            None => return None,
        };
        let bucket = self.buckets.get_mut(&key).expect("bucket for key just found");
        let extent = bucket.pop().expect("empty buckets are removed eagerly");
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        self.free_bytes -= extent.size;
        self.free_blocks -= 1;
        trace!("fit for {} bytes from bucket {}: {:?}", size, key, extent);
        Some(extent)
    }

    /// Merge every run of physically adjacent extents, rebuilding the
    /// index and its counters. Returns the number of merges performed.
    pub fn coalesce(&mut self) -> usize {
        let mut extents: Vec<FreeExtent> = self.iter().collect();
        if extents.len() < 2 {
            return 0;
        }
        extents.sort_unstable_by_key(|e| e.offset);

        self.buckets.clear();
        self.free_bytes = 0;
        self.free_blocks = 0;

        let mut merges = 0;
        let mut run = extents[0];
        for &next in &extents[1..] {
            if run.end() == next.offset {
                run.size += next.size;
                merges += 1;
            } else {
                self.insert(run);
                run = next;
            }
        }
        self.insert(run);

        debug!("coalesce merged {} adjacent extents into {} blocks", merges, self.free_blocks);
        merges
    }

    /// Drop all extents.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.free_bytes = 0;
        self.free_blocks = 0;
    }

    /// All extents, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = FreeExtent> + '_ {
        self.buckets.values().flatten().copied()
    }

    /// Check the index for structural damage and gather its stats.
    /// `limit` is the bump offset; no extent may reach past it.
    pub fn audit(&self, limit: usize) -> (Validity, FreeStats) {
        let mut validity = Validity::default();
        let mut stats = FreeStats::default();

        let mut extents: Vec<FreeExtent> = self.iter().collect();
        extents.sort_unstable_by_key(|e| e.offset);

        let mut previous: Option<FreeExtent> = None;
        for extent in extents {
            if extent.offset % ALIGN != 0 || extent.size % ALIGN != 0 || extent.size < ALIGN {
                validity.misaligned += 1;
            }
            if extent.end() > limit {
                validity.out_of_bounds += 1;
            }
            match previous {
                Some(prev) if prev.end() > extent.offset => validity.overlaps += 1,
                Some(prev) if prev.end() == extent.offset => stats.adjacent_pairs += 1,
                _ => {}
            }
            stats.blocks += 1;
            stats.bytes += extent.size;
            previous = Some(extent);
        }

        (validity, stats)
    }
}

impl fmt::Display for FreeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FreeIndex(")?;
        let mut start = true;
        for extent in self.iter() {
            if !start {
                write!(f, ", ")?;
            } else {
                start = false;
            }
            write!(f, "Extent({}, {})", extent.offset, extent.size)?;
        }
        write!(f, ")")
    }
}

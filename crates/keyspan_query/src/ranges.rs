//! Index ranges to backend row ranges.
//!
//! Every range becomes the half-open row range `[start, next_prefix(end))`,
//! where a point range uses its single key as `end`. Row keys carry the
//! insertion id as a prefix, so the successor of `end` is the first key past
//! every row written at `end`. A missing successor (empty or all-`0xFF` end)
//! leaves the stop unbounded, and an empty start is the keyspace start.

use keyspan_core::ByteRange;
use keyspan_store::{MultiRowRangeFilter, RowRange};

use crate::index::Index;

/// Turns query constraints into index key ranges; backed by the index's
/// space-filling curve.
pub trait RangeDecomposer: Send + Sync {
    /// `max_ranges` caps how many ranges the decomposition may produce.
    fn decompose(&self, index: &Index, max_ranges: Option<usize>) -> Vec<ByteRange>;
}

pub fn row_range(range: &ByteRange) -> RowRange {
    RowRange::half_open(range.start().clone(), range.stop_bound())
}

/// No ranges means the whole keyspace.
pub fn row_ranges(ranges: &[ByteRange]) -> MultiRowRangeFilter {
    if ranges.is_empty() {
        return MultiRowRangeFilter::full_keyspace();
    }
    MultiRowRangeFilter::new(ranges.iter().map(row_range).collect())
}

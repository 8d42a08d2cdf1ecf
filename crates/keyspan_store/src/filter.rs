//! Multi-range row filter.
//!
//! A scan covers several key ranges at once. The filter keeps them sorted and
//! non-overlapping so a backend can walk them in key order with one scanner,
//! and so results across ranges come back in ascending row-key order.

use std::cmp::Ordering;

use keyspan_core::ByteId;
use serde::Serialize;

/// One contiguous row range.
///
/// An empty `start` means the beginning of the keyspace and an empty `stop`
/// means unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowRange {
    pub start: ByteId,
    pub start_inclusive: bool,
    pub stop: ByteId,
    pub stop_inclusive: bool,
}

impl RowRange {
    pub fn new(start: ByteId, start_inclusive: bool, stop: ByteId, stop_inclusive: bool) -> Self {
        Self {
            start,
            start_inclusive,
            stop,
            stop_inclusive,
        }
    }

    /// `[start, stop)`, with `None` meaning no upper bound.
    pub fn half_open(start: ByteId, stop: Option<ByteId>) -> Self {
        Self::new(start, true, stop.unwrap_or_default(), false)
    }

    /// The whole keyspace.
    pub fn full() -> Self {
        Self::new(ByteId::empty(), true, ByteId::empty(), false)
    }

    pub fn is_unbounded_stop(&self) -> bool {
        self.stop.is_empty()
    }

    /// Where `key` falls relative to this range.
    pub fn position(&self, key: &[u8]) -> Ordering {
        let start = self.start.as_bytes();
        if !start.is_empty() {
            match key.cmp(start) {
                Ordering::Less => return Ordering::Less,
                Ordering::Equal if !self.start_inclusive => return Ordering::Less,
                _ => {}
            }
        }
        if self.is_unbounded_stop() {
            return Ordering::Equal;
        }
        match key.cmp(self.stop.as_bytes()) {
            Ordering::Less => Ordering::Equal,
            Ordering::Equal if self.stop_inclusive => Ordering::Equal,
            _ => Ordering::Greater,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.position(key) == Ordering::Equal
    }

    /// True when the range can never match a key.
    fn is_empty(&self) -> bool {
        if self.is_unbounded_stop() || self.start.is_empty() {
            return false;
        }
        match self.start.cmp(&self.stop) {
            Ordering::Greater => true,
            Ordering::Equal => !(self.start_inclusive && self.stop_inclusive),
            Ordering::Less => false,
        }
    }

    fn start_cmp(&self, other: &RowRange) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| other.start_inclusive.cmp(&self.start_inclusive))
    }

    /// True when `next` (which starts at or after `self`) overlaps or abuts `self`.
    fn joins(&self, next: &RowRange) -> bool {
        if self.is_unbounded_stop() {
            return true;
        }
        match next.start.cmp(&self.stop) {
            Ordering::Less => true,
            Ordering::Equal => self.stop_inclusive || next.start_inclusive,
            Ordering::Greater => false,
        }
    }

    fn extend_to(&mut self, next: &RowRange) {
        if self.is_unbounded_stop() {
            return;
        }
        if next.is_unbounded_stop() {
            self.stop = ByteId::empty();
            self.stop_inclusive = false;
            return;
        }
        match next.stop.cmp(&self.stop) {
            Ordering::Greater => {
                self.stop = next.stop.clone();
                self.stop_inclusive = next.stop_inclusive;
            }
            Ordering::Equal => self.stop_inclusive |= next.stop_inclusive,
            Ordering::Less => {}
        }
    }
}

/// Sorted, merged set of row ranges evaluated as one filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MultiRowRangeFilter {
    ranges: Vec<RowRange>,
}

impl MultiRowRangeFilter {
    /// Sorts `ranges` by start key and merges overlapping or adjacent ones.
    pub fn new(mut ranges: Vec<RowRange>) -> Self {
        ranges.retain(|range| !range.is_empty());
        ranges.sort_by(RowRange::start_cmp);
        let mut merged: Vec<RowRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.joins(&range) => last.extend_to(&range),
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn full_keyspace() -> Self {
        Self {
            ranges: vec![RowRange::full()],
        }
    }

    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Index of the first range whose stop is not below `key`.
    fn search(&self, key: &[u8]) -> usize {
        self.ranges
            .partition_point(|range| range.position(key) == Ordering::Greater)
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        self.ranges
            .get(self.search(key))
            .is_some_and(|range| range.contains(key))
    }

    /// The range containing `key`, or else the next range after it.
    pub fn range_at_or_after(&self, key: &[u8]) -> Option<&RowRange> {
        self.ranges.get(self.search(key))
    }
}

use serde::{Deserialize, Serialize};

use crate::id::ByteId;

/// A key interval produced by index range decomposition.
///
/// Interval ranges cover every key from `start` through `end`, including keys
/// that extend `end` as a prefix. Single-value ranges address one key
/// position; their `end` is ignored and the stop bound is derived from `start`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    start: ByteId,
    end: ByteId,
    single_value: bool,
}

impl ByteRange {
    pub fn new(start: impl Into<ByteId>, end: impl Into<ByteId>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            single_value: false,
        }
    }

    pub fn single(key: impl Into<ByteId>) -> Self {
        let key = key.into();
        Self {
            start: key.clone(),
            end: key,
            single_value: true,
        }
    }

    pub fn start(&self) -> &ByteId {
        &self.start
    }

    /// Last key of the interval; equal to `start` for single-value ranges.
    pub fn end(&self) -> &ByteId {
        if self.single_value {
            &self.start
        } else {
            &self.end
        }
    }

    pub fn is_single_value(&self) -> bool {
        self.single_value
    }

    /// Exclusive upper bound for the range, `None` when unbounded.
    pub fn stop_bound(&self) -> Option<ByteId> {
        self.end().next_prefix()
    }

    /// True when the two ranges share at least one key position.
    pub fn intersects(&self, other: &ByteRange) -> bool {
        let self_stop = self.stop_bound();
        let other_stop = other.stop_bound();
        let starts_before_other_stops = other_stop.map_or(true, |stop| self.start < stop);
        let other_starts_before_self_stops = self_stop.map_or(true, |stop| other.start < stop);
        starts_before_other_stops && other_starts_before_self_stops
    }

    /// Sorts ranges and merges the ones that overlap or touch.
    ///
    /// Merged output ranges are interval ranges unless a single-value range
    /// stood alone.
    pub fn merge_intersections(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
        ranges.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end().cmp(b.end())));
        let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            let Some(last) = merged.last_mut() else {
                merged.push(range);
                continue;
            };
            let touches = last.stop_bound().map_or(true, |stop| range.start <= stop);
            if !touches {
                merged.push(range);
                continue;
            }
            if range.end() > last.end() {
                last.end = range.end().clone();
            } else {
                last.end = last.end().clone();
            }
            last.single_value = last.single_value && range.single_value && last.start == range.start;
        }
        merged
    }
}

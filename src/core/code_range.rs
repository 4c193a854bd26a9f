//! Executable address ranges and the sorted index over them.
//!
//! `CodeSectionIndex` keeps the ranges sorted by start address with no
//! overlaps. Overlapping input is resolved at construction: the earlier
//! start wins and, for equal starts, the shorter range wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// A half-open executable byte range `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: u64,
    pub length: u64,
}

impl CodeRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// End address (exclusive).
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// Whether `[start, start + len)` shares at least one byte with this range.
    pub fn intersects(&self, start: u64, len: u64) -> bool {
        len > 0 && start < self.end() && start.saturating_add(len) > self.start
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end())
    }
}

/// Sorted, non-overlapping set of code ranges.
#[derive(Debug, Clone, Default)]
pub struct CodeSectionIndex {
    ranges: Vec<CodeRange>,
}

impl CodeSectionIndex {
    pub fn new(mut ranges: Vec<CodeRange>) -> Self {
        ranges.retain(|r| r.length > 0);
        ranges.sort_by_key(|r| (r.start, r.length));

        let mut kept: Vec<CodeRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = kept.last() {
                if range.start < last.end() {
                    warn!(
                        dropped = %range,
                        kept = %last,
                        "Dropping code range that overlaps an earlier one"
                    );
                    continue;
                }
            }
            kept.push(range);
        }
        Self { ranges: kept }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CodeRange> {
        self.ranges.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeRange> {
        self.ranges.iter()
    }

    /// Index of the range containing `address`.
    pub fn section_for(&self, address: u64) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.start <= address);
        let candidate = idx.checked_sub(1)?;
        self.ranges[candidate]
            .contains(address)
            .then_some(candidate)
    }

    /// Index of the range that starts exactly at `start`.
    pub fn position_of(&self, start: u64) -> Option<usize> {
        self.ranges.binary_search_by_key(&start, |r| r.start).ok()
    }

    pub fn range_before(&self, index: usize) -> Option<usize> {
        index.checked_sub(1).filter(|&i| i < self.ranges.len())
    }

    pub fn range_after(&self, index: usize) -> Option<usize> {
        let next = index.checked_add(1)?;
        (next < self.ranges.len()).then_some(next)
    }

    /// All ranges sharing a byte with `[start, start + len)`.
    pub fn intersecting(&self, start: u64, len: u64) -> impl Iterator<Item = &CodeRange> {
        let end = start.saturating_add(len);
        let first = self.ranges.partition_point(|r| r.end() <= start);
        self.ranges[first..]
            .iter()
            .take_while(move |r| r.start < end)
            .filter(move |r| r.intersects(start, len))
    }
}

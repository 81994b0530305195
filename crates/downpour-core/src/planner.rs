//! Segment planning.
//!
//! Splits a resource into contiguous byte ranges, one per connection. Planning
//! happens exactly once per task; resume reuses the persisted boundaries
//! verbatim and only fresh tasks compute new ones.

use serde::{Deserialize, Serialize};

/// Sentinel `end` for a resource of unknown length: the single segment is
/// open-ended and completes when the stream ends.
pub const OPEN_END: u64 = u64::MAX;

/// A contiguous byte range `[start, end]` (inclusive) of the resource,
/// fetched and tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (inclusive); `OPEN_END` when the total size is unknown.
    pub end: u64,
    /// Bytes already written for this segment; monotonically non-decreasing
    /// while the task is active.
    pub downloaded: u64,
    pub complete: bool,
}

impl Segment {
    /// Length in bytes; meaningless for an open-ended segment.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        !self.open_ended() && self.downloaded == 0
    }

    pub fn open_ended(&self) -> bool {
        self.end == OPEN_END
    }

    /// Absolute offset of the next byte to fetch.
    pub fn next_offset(&self) -> u64 {
        self.start + self.downloaded
    }

    /// Bytes still missing; `None` for an open-ended segment.
    pub fn remaining(&self) -> Option<u64> {
        if self.open_ended() {
            return None;
        }
        Some(self.len().saturating_sub(self.downloaded))
    }
}

/// Plans segments for a fresh task.
///
/// With a known size and range support, `[0, total)` is split into
/// `connections` near-equal contiguous ranges; the last segment absorbs the
/// remainder. Without range support or a known size, exactly one segment
/// covers the whole resource and the connection count collapses to 1.
/// A zero-length resource plans no segments at all.
pub fn plan_segments(total: Option<u64>, accept_ranges: bool, connections: usize) -> Vec<Segment> {
    match total {
        Some(0) => Vec::new(),
        Some(total) if accept_ranges => {
            let count = connections.max(1).min(total as usize);
            let base = total / count as u64;
            let mut out = Vec::with_capacity(count);
            for index in 0..count {
                let start = index as u64 * base;
                let end = if index == count - 1 {
                    total - 1
                } else {
                    start + base - 1
                };
                out.push(Segment {
                    index,
                    start,
                    end,
                    downloaded: 0,
                    complete: false,
                });
            }
            out
        }
        Some(total) => vec![Segment {
            index: 0,
            start: 0,
            end: total - 1,
            downloaded: 0,
            complete: false,
        }],
        None => vec![Segment {
            index: 0,
            start: 0,
            end: OPEN_END,
            downloaded: 0,
            complete: false,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Segments must be contiguous, non-overlapping, and exactly cover
    /// `[0, total)`.
    fn assert_partition(segments: &[Segment], total: u64) {
        assert!(!segments.is_empty());
        assert_eq!(segments[0].start, 0);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        assert_eq!(segments.last().unwrap().end, total - 1);
        let sum: u64 = segments.iter().map(|s| s.len()).sum();
        assert_eq!(sum, total);
    }

    #[test]
    fn plan_even_split() {
        let segs = plan_segments(Some(1000), true, 4);
        assert_eq!(segs.len(), 4);
        assert_partition(&segs, 1000);
        assert_eq!(segs[0].end, 249);
        assert_eq!(segs[3].start, 750);
    }

    #[test]
    fn plan_last_absorbs_remainder() {
        let segs = plan_segments(Some(10), true, 4);
        assert_eq!(segs.len(), 4);
        assert_partition(&segs, 10);
        // base = 2; the last segment takes the remainder.
        assert_eq!(segs[3].len(), 4);
    }

    #[test]
    fn plan_single_connection() {
        let segs = plan_segments(Some(1000), true, 1);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, 0);
        assert_eq!(segs[0].end, 999);
    }

    #[test]
    fn plan_more_connections_than_bytes() {
        let segs = plan_segments(Some(3), true, 8);
        assert_eq!(segs.len(), 3);
        assert_partition(&segs, 3);
    }

    #[test]
    fn plan_without_range_support_collapses_to_one() {
        let segs = plan_segments(Some(1000), false, 8);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].end, 999);
    }

    #[test]
    fn plan_unknown_size_is_open_ended() {
        let segs = plan_segments(None, true, 8);
        assert_eq!(segs.len(), 1);
        assert!(segs[0].open_ended());
        assert_eq!(segs[0].remaining(), None);
    }

    #[test]
    fn plan_zero_bytes_plans_nothing() {
        assert!(plan_segments(Some(0), true, 4).is_empty());
    }

    #[test]
    fn next_offset_tracks_downloaded() {
        let mut s = plan_segments(Some(100), true, 1).remove(0);
        assert_eq!(s.next_offset(), 0);
        s.downloaded = 40;
        assert_eq!(s.next_offset(), 40);
        assert_eq!(s.remaining(), Some(60));
    }
}

//! Received packet number tracking for ACK generation.

use crate::endpoint::{DefaultLimits, EndpointLimits};
use crate::frame::AckFrame;

const MAX_RANGES: usize = <DefaultLimits as EndpointLimits>::ACK_RANGES;

/// Received packet numbers of one packet number space.
///
/// Stores non-overlapping, non-adjacent `(start, end)` inclusive ranges in
/// ascending order. When the set is full the lowest range is dropped.
#[derive(Debug, Default)]
pub struct RecvPnTracker {
    ranges: heapless::Vec<(u64, u64), MAX_RANGES>,
    /// An ack-eliciting packet arrived since the last ACK went out.
    ack_pending: bool,
}

impl RecvPnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The largest received packet number.
    pub fn largest(&self) -> Option<u64> {
        self.ranges.last().map(|&(_, end)| end)
    }

    /// Record reception of `pn`.
    pub fn record(&mut self, pn: u64, ack_eliciting: bool) {
        self.ack_pending |= ack_eliciting;

        let mut extends_up: Option<usize> = None;
        let mut extends_down: Option<usize> = None;
        for (i, &(start, end)) in self.ranges.iter().enumerate() {
            if (start..=end).contains(&pn) {
                return;
            }
            if pn == end + 1 {
                extends_up = Some(i);
            }
            if pn + 1 == start {
                extends_down = Some(i);
            }
        }

        match (extends_up, extends_down) {
            (Some(lo), Some(hi)) => {
                // pn bridges two ranges; ascending order puts `hi` right after `lo`
                self.ranges[lo].1 = self.ranges[hi].1;
                self.ranges.remove(hi);
            }
            (Some(lo), None) => self.ranges[lo].1 = pn,
            (None, Some(hi)) => self.ranges[hi].0 = pn,
            (None, None) => {
                if self.ranges.is_full() {
                    self.ranges.remove(0);
                }
                let pos = self
                    .ranges
                    .iter()
                    .position(|&(s, _)| s > pn)
                    .unwrap_or(self.ranges.len());
                // room was made above; push then rotate into place
                let _ = self.ranges.push((pn, pn));
                self.ranges[pos..].rotate_right(1);
            }
        }
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// ACK for the highest contiguous range, clearing the pending flag.
    pub fn take_ack(&mut self) -> Option<AckFrame<'static>> {
        if !self.ack_pending {
            return None;
        }
        self.ack_pending = false;
        let &(start, end) = self.ranges.last()?;
        Some(AckFrame {
            largest_ack: end,
            ack_delay: 0,
            first_ack_range: end - start,
            ack_ranges: &[],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(t: &RecvPnTracker) -> Vec<(u64, u64)> {
        t.ranges.iter().copied().collect()
    }

    #[test]
    fn merges_adjacent_numbers() {
        let mut t = RecvPnTracker::new();
        for pn in [0, 1, 2, 5, 7, 6] {
            t.record(pn, true);
        }
        assert_eq!(ranges(&t), vec![(0, 2), (5, 7)]);
        t.record(4, false);
        t.record(3, false);
        assert_eq!(ranges(&t), vec![(0, 7)]);
        assert_eq!(t.largest(), Some(7));
    }

    #[test]
    fn out_of_order_insert_keeps_ascending_order() {
        let mut t = RecvPnTracker::new();
        for pn in [10, 2, 6] {
            t.record(pn, false);
        }
        assert_eq!(ranges(&t), vec![(2, 2), (6, 6), (10, 10)]);
        assert!(t.take_ack().is_none());
    }

    #[test]
    fn full_tracker_drops_lowest_range() {
        let mut t = RecvPnTracker::new();
        for i in 0..MAX_RANGES as u64 + 1 {
            t.record(i * 2, false);
        }
        assert_eq!(t.ranges.len(), MAX_RANGES);
        assert_eq!(t.ranges[0], (2, 2));
    }

    #[test]
    fn ack_covers_top_range_once() {
        let mut t = RecvPnTracker::new();
        t.record(0, true);
        t.record(3, true);
        t.record(4, false);
        let ack = t.take_ack().unwrap();
        assert_eq!((ack.largest_ack, ack.first_ack_range), (4, 1));
        assert!(!t.ack_pending());
        assert!(t.take_ack().is_none());
    }
}

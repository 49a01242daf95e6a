//! Received-range bookkeeping: fills are stored, holes are derived.
//!
//! The fill list is kept sorted by start, non-overlapping and non-adjacent.
//! There is no removal; the record only ever grows.

use std::fmt;

/// Half-open byte range `[start, end)`, `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    /// `None` for zero or negative length.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoleTracker {
    fills: Vec<Interval>,
}

impl HoleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[start, end)` as received. Returns true if any new byte was
    /// covered; degenerate ranges and already-covered ranges return false.
    pub fn add(&mut self, start: u64, end: u64) -> bool {
        let Some(iv) = Interval::new(start, end) else {
            return false;
        };
        if self.fills.iter().any(|f| f.start <= iv.start && iv.end <= f.end) {
            return false;
        }
        let pos = self.fills.partition_point(|f| f.start <= iv.start);
        self.fills.insert(pos, iv);
        self.merge();
        true
    }

    /// One left-to-right pass over the sorted list, folding each interval
    /// into its predecessor when it overlaps or touches it.
    fn merge(&mut self) {
        let mut merged: Vec<Interval> = Vec::with_capacity(self.fills.len());
        for iv in self.fills.drain(..) {
            match merged.last_mut() {
                Some(last) if iv.start <= last.end => {
                    if iv.end > last.end {
                        last.end = iv.end;
                    }
                }
                _ => merged.push(iv),
            }
        }
        self.fills = merged;
    }

    pub fn fills(&self) -> &[Interval] {
        &self.fills
    }

    /// Gaps before and between fills. Never includes a trailing gap: the
    /// tracker does not know the total length (see [`holes_within`]).
    ///
    /// [`holes_within`]: HoleTracker::holes_within
    pub fn holes(&self) -> Vec<Interval> {
        let mut out = Vec::with_capacity(self.fills.len());
        if let Some(first) = self.fills.first() {
            if first.start > 0 {
                out.push(Interval {
                    start: 0,
                    end: first.start,
                });
            }
        }
        for pair in self.fills.windows(2) {
            out.push(Interval {
                start: pair[0].end,
                end: pair[1].start,
            });
        }
        out
    }

    pub fn count_holes(&self) -> usize {
        self.holes().len()
    }

    /// Holes clipped to `[0, total)`, including the trailing gap after the
    /// last fill.
    pub fn holes_within(&self, total: u64) -> Vec<Interval> {
        let mut out: Vec<Interval> = self
            .holes()
            .into_iter()
            .filter_map(|h| Interval::new(h.start, h.end.min(total)))
            .collect();
        let tail_start = self.fills.last().map(|f| f.end).unwrap_or(0);
        if let Some(tail) = Interval::new(tail_start, total) {
            out.push(tail);
        }
        out
    }

    /// True exactly when the fills are the single interval `[0, total)`.
    pub fn is_complete(&self, total: u64) -> bool {
        match self.fills.as_slice() {
            [] => total == 0,
            [only] => only.start == 0 && only.end == total,
            _ => false,
        }
    }

    /// End of the fill starting at zero, or zero if byte 0 is still missing.
    pub fn contiguous_from_zero(&self) -> u64 {
        match self.fills.first() {
            Some(f) if f.start == 0 => f.end,
            _ => 0,
        }
    }

    /// Total bytes covered.
    pub fn received(&self) -> u64 {
        self.fills.iter().map(Interval::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn iv(start: u64, end: u64) -> Interval {
        Interval { start, end }
    }

    #[test]
    fn adjacent_fills_merge() {
        let mut t = HoleTracker::new();
        t.add(0, 5);
        t.add(5, 10);
        assert_eq!(t.fills(), &[iv(0, 10)]);
        assert!(t.holes().is_empty());
        assert!(t.is_complete(10));
    }

    #[test]
    fn gaps_without_trailing_hole() {
        let mut t = HoleTracker::new();
        t.add(2, 4);
        t.add(6, 8);
        assert_eq!(t.holes(), vec![iv(0, 2), iv(4, 6)]);
        assert_eq!(t.count_holes(), 2);
    }

    #[test]
    fn contained_fill_absorbed() {
        let mut t = HoleTracker::new();
        assert!(t.add(0, 10));
        assert!(!t.add(3, 5));
        assert_eq!(t.fills(), &[iv(0, 10)]);
    }

    #[test]
    fn degenerate_ranges_ignored() {
        let mut t = HoleTracker::new();
        t.add(1, 2);
        assert!(!t.add(5, 5));
        assert!(!t.add(7, 3));
        assert_eq!(t.fills(), &[iv(1, 2)]);
    }

    #[test]
    fn adding_twice_is_idempotent() {
        let mut once = HoleTracker::new();
        once.add(3, 9);
        once.add(12, 20);
        let mut twice = once.clone();
        twice.add(12, 20);
        twice.add(3, 9);
        assert_eq!(once, twice);
    }

    #[test]
    fn bridge_fill_joins_neighbours() {
        let mut t = HoleTracker::new();
        t.add(0, 2);
        t.add(4, 6);
        t.add(8, 10);
        t.add(1, 9);
        assert_eq!(t.fills(), &[iv(0, 10)]);
    }

    #[test]
    fn out_of_order_inserts_stay_sorted() {
        let mut t = HoleTracker::new();
        t.add(50, 60);
        t.add(10, 20);
        t.add(30, 40);
        t.add(20, 25);
        assert_eq!(t.fills(), &[iv(10, 25), iv(30, 40), iv(50, 60)]);
        assert_eq!(t.holes(), vec![iv(0, 10), iv(25, 30), iv(40, 50)]);
    }

    #[test]
    fn holes_within_total() {
        let mut t = HoleTracker::new();
        assert_eq!(t.holes_within(100), vec![iv(0, 100)]);
        assert!(t.holes_within(0).is_empty());
        t.add(10, 20);
        assert_eq!(t.holes_within(100), vec![iv(0, 10), iv(20, 100)]);
        assert_eq!(t.holes_within(15), vec![iv(0, 10)]);
        t.add(0, 10);
        t.add(20, 100);
        assert!(t.holes_within(100).is_empty());
        assert!(t.is_complete(100));
        assert!(!t.is_complete(101));
    }

    #[test]
    fn progress_counters() {
        let mut t = HoleTracker::new();
        assert_eq!(t.contiguous_from_zero(), 0);
        t.add(5, 10);
        assert_eq!(t.contiguous_from_zero(), 0);
        t.add(0, 3);
        assert_eq!(t.contiguous_from_zero(), 3);
        assert_eq!(t.received(), 8);
    }

    #[test]
    fn random_adds_match_byte_map() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let total = 200u64;
            let mut map = vec![false; total as usize];
            let mut t = HoleTracker::new();
            for _ in 0..rng.gen_range(1..30) {
                let a = rng.gen_range(0..total);
                let b = rng.gen_range(0..=total);
                t.add(a, b);
                if b > a {
                    for slot in &mut map[a as usize..b as usize] {
                        *slot = true;
                    }
                }
            }
            for pair in t.fills().windows(2) {
                assert!(pair[0].end < pair[1].start, "fills must not touch");
            }
            for f in t.fills() {
                assert!((f.start..f.end).all(|i| map[i as usize]));
            }
            for h in t.holes_within(total) {
                assert!((h.start..h.end).all(|i| !map[i as usize]));
            }
            let covered = map.iter().filter(|b| **b).count() as u64;
            assert_eq!(t.received(), covered);
        }
    }
}

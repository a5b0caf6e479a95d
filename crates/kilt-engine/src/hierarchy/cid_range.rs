//! Class-id ranges

use std::fmt;

/// Closed interval of class ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidRange {
    /// First cid in the range
    pub start: u32,
    /// Last cid in the range (inclusive)
    pub end: u32,
}

impl CidRange {
    /// Range `[start, end]`
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        CidRange { start, end }
    }

    /// Range holding exactly one cid
    pub fn single(cid: u32) -> Self {
        CidRange { start: cid, end: cid }
    }

    /// Whether `cid` lies inside the range
    pub fn contains(&self, cid: u32) -> bool {
        self.start <= cid && cid <= self.end
    }

    /// Number of cids covered
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Whether the range covers a single cid
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for CidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "[{}]", self.start)
        } else {
            write!(f, "[{}-{}]", self.start, self.end)
        }
    }
}

/// Build sorted, maximal ranges of the cids in `0..num_cids` accepted by `pred`.
///
/// Cids for which `skip` holds neither break nor extend a range: they are
/// bridged when both neighbours are accepted.
pub fn build_ranges(
    num_cids: usize,
    pred: impl Fn(u32) -> bool,
    skip: impl Fn(u32) -> bool,
) -> Vec<CidRange> {
    let mut ranges: Vec<CidRange> = Vec::new();
    let mut open: Option<(u32, u32)> = None;
    for cid in 0..num_cids as u32 {
        if skip(cid) {
            continue;
        }
        if pred(cid) {
            open = match open {
                Some((start, _)) => Some((start, cid)),
                None => Some((cid, cid)),
            };
        } else if let Some((start, end)) = open.take() {
            ranges.push(CidRange::new(start, end));
        }
    }
    if let Some((start, end)) = open {
        ranges.push(CidRange::new(start, end));
    }
    ranges
}

/// Binary search for `cid` in sorted, disjoint ranges
pub fn ranges_contain(ranges: &[CidRange], cid: u32) -> bool {
    let mut lo = 0usize;
    let mut hi = ranges.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let range = ranges[mid];
        if cid < range.start {
            hi = mid;
        } else if cid > range.end {
            lo = mid + 1;
        } else {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_merges_adjacent() {
        let ranges = build_ranges(10, |c| matches!(c, 1 | 2 | 3 | 6 | 8 | 9), |_| false);
        assert_eq!(
            ranges,
            vec![CidRange::new(1, 3), CidRange::single(6), CidRange::new(8, 9)]
        );
    }

    #[test]
    fn test_build_bridges_skipped() {
        let ranges = build_ranges(6, |c| c == 1 || c == 3, |c| c == 2);
        assert_eq!(ranges, vec![CidRange::new(1, 3)]);
    }

    #[test]
    fn test_ranges_contain() {
        let ranges = vec![CidRange::new(1, 3), CidRange::single(6), CidRange::new(8, 9)];
        for cid in [1, 2, 3, 6, 8, 9] {
            assert!(ranges_contain(&ranges, cid), "cid {}", cid);
        }
        for cid in [0, 4, 5, 7, 10] {
            assert!(!ranges_contain(&ranges, cid), "cid {}", cid);
        }
        assert!(!ranges_contain(&[], 0));
    }
}

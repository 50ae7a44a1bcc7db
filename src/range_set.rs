//! Compact set of non-negative integers stored as sorted inclusive ranges.
//!
//! Used to remember which input indices already reached an output written
//! out of order: completed work tends to cluster, so a handful of ranges
//! usually covers millions of indices.

use std::fmt;

use itertools::Itertools;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContiguousRangeSet {
    /// Disjoint, non-adjacent, sorted by start.
    ranges: Vec<(usize, usize)>,
}

impl ContiguousRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value`, merging it with neighbouring ranges. Returns `false`
    /// when it was already present.
    pub fn add(&mut self, value: usize) -> bool {
        let pos = self.ranges.partition_point(|&(start, _)| start <= value);

        if pos > 0 {
            let (_, end) = self.ranges[pos - 1];
            if value <= end {
                return false;
            }
        }

        let joins_left = pos > 0 && self.ranges[pos - 1].1 + 1 == value;
        let joins_right = pos < self.ranges.len() && value + 1 == self.ranges[pos].0;

        match (joins_left, joins_right) {
            (true, true) => {
                self.ranges[pos - 1].1 = self.ranges[pos].1;
                self.ranges.remove(pos);
            }
            (true, false) => self.ranges[pos - 1].1 = value,
            (false, true) => self.ranges[pos].0 = value,
            (false, false) => self.ranges.insert(pos, (value, value)),
        }
        true
    }

    pub fn contains(&self, value: usize) -> bool {
        let pos = self.ranges.partition_point(|&(start, _)| start <= value);
        pos > 0 && value <= self.ranges[pos - 1].1
    }

    /// Number of integers in the set.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|(start, end)| end - start + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }
}

impl FromIterator<usize> for ContiguousRangeSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = ContiguousRangeSet::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl fmt::Display for ContiguousRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.ranges.iter().map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        });
        write!(f, "{}", parts.format(","))
    }
}

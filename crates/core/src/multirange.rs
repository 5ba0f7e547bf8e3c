//! Compact integer-set encoding used for series image numbers.
//!
//! A [`MultiRange`] is a set of non-negative integers stored as sorted,
//! non-overlapping, non-adjacent inclusive ranges. Its textual form is a
//! comma-separated list of single numbers and `start-end` ranges, e.g.
//! `"1-50"` or `"1-5,7,10-12"`. The empty set formats as `""`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A set of image numbers stored as merged inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiRange {
    ranges: Vec<(u32, u32)>,
}

impl MultiRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set holding every number in `start..=end`.
    pub fn from_range(start: u32, end: u32) -> Self {
        let mut set = Self::new();
        set.insert_range(start, end);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of integers in the set.
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(lo, hi)| u64::from(hi - lo) + 1)
            .sum()
    }

    pub fn min(&self) -> Option<u32> {
        self.ranges.first().map(|&(lo, _)| lo)
    }

    pub fn max(&self) -> Option<u32> {
        self.ranges.last().map(|&(_, hi)| hi)
    }

    pub fn contains(&self, value: u32) -> bool {
        // Ranges are sorted by start, so binary search on the lower bound.
        let idx = self.ranges.partition_point(|&(lo, _)| lo <= value);
        idx > 0 && self.ranges[idx - 1].1 >= value
    }

    /// The inclusive ranges in ascending order.
    pub fn segments(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    /// Iterate every member in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    pub fn insert(&mut self, value: u32) {
        self.insert_range(value, value);
    }

    /// Add `start..=end` (the bounds may be given in either order), merging
    /// with any overlapping or adjacent range.
    pub fn insert_range(&mut self, start: u32, end: u32) {
        let (mut lo, mut hi) = if start <= end { (start, end) } else { (end, start) };

        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &(a, b) in &self.ranges {
            if b.saturating_add(1) < lo {
                merged.push((a, b));
            } else if hi.saturating_add(1) < a {
                if !placed {
                    merged.push((lo, hi));
                    placed = true;
                }
                merged.push((a, b));
            } else {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        if !placed {
            merged.push((lo, hi));
        }
        self.ranges = merged;
    }
}

impl FromStr for MultiRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (start, end) = match token.split_once('-') {
                Some((a, b)) => (parse_bound(a, s)?, parse_bound(b, s)?),
                None => {
                    let n = parse_bound(token, s)?;
                    (n, n)
                }
            };
            set.insert_range(start, end);
        }
        Ok(set)
    }
}

fn parse_bound(raw: &str, whole: &str) -> Result<u32, CoreError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| CoreError::Validation(format!("Malformed multirange string: \"{whole}\"")))
}

impl fmt::Display for MultiRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl FromIterator<u32> for MultiRange {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut values: Vec<u32> = iter.into_iter().collect();
        values.sort_unstable();
        values.dedup();

        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for v in values {
            match ranges.last_mut() {
                Some((_, hi)) if hi.checked_add(1) == Some(v) => *hi = v,
                _ => ranges.push((v, v)),
            }
        }
        Self { ranges }
    }
}

impl Serialize for MultiRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MultiRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

//! Strided sub-range selection within a series.

use serde::{Deserialize, Serialize};

use crate::multirange::MultiRange;

/// Selects the image numbers `start, start + delta, ..., end` of a series.
///
/// `delta` may be negative to walk the series backwards, in which case
/// `start` must be greater than or equal to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialVolumeDescriptor {
    pub start: i64,
    pub end: i64,
    pub delta: i64,
}

impl PartialVolumeDescriptor {
    pub fn new(start: i64, end: i64, delta: i64) -> Self {
        Self { start, end, delta }
    }

    /// Whether the triple describes a non-empty, exactly reachable index
    /// sequence of positive image numbers.
    ///
    /// Rules: `delta` is non-zero, both bounds are at least 1, the direction
    /// of `end - start` agrees with the sign of `delta`, and `end` is hit
    /// exactly by stepping from `start`.
    pub fn is_well_formed(&self) -> bool {
        if self.delta == 0 || self.start < 1 || self.end < 1 {
            return false;
        }
        if self.start > u32::MAX as i64 || self.end > u32::MAX as i64 {
            return false;
        }
        let span = self.end - self.start;
        if span != 0 && span.signum() != self.delta.signum() {
            return false;
        }
        span % self.delta == 0
    }

    /// Number of images selected. Zero for malformed descriptors.
    pub fn len(&self) -> u64 {
        if !self.is_well_formed() {
            return 0;
        }
        ((self.end - self.start) / self.delta) as u64 + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The selected image numbers in stepping order. Empty for malformed
    /// descriptors.
    pub fn indices(&self) -> impl Iterator<Item = u32> {
        let count = self.len();
        let (start, delta) = (self.start, self.delta);
        (0..count).map(move |i| (start + i as i64 * delta) as u32)
    }

    /// Whether every selected image number is present in `available`.
    pub fn is_within(&self, available: &MultiRange) -> bool {
        if !self.is_well_formed() {
            return false;
        }
        let lo = self.start.min(self.end) as u32;
        let hi = self.start.max(self.end) as u32;
        // Fast path: the whole span is covered by one contiguous segment.
        if available
            .segments()
            .iter()
            .any(|&(a, b)| a <= lo && hi <= b)
        {
            return true;
        }
        self.indices().all(|i| available.contains(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available() -> MultiRange {
        "1-50".parse().unwrap()
    }

    #[test]
    fn full_span_is_accepted() {
        let d = PartialVolumeDescriptor::new(1, 50, 1);
        assert!(d.is_well_formed());
        assert!(d.is_within(&available()));
        assert_eq!(d.len(), 50);
    }

    #[test]
    fn overreaching_end_is_rejected() {
        let d = PartialVolumeDescriptor::new(1, 100, 1);
        assert!(d.is_well_formed());
        assert!(!d.is_within(&available()));
    }

    #[test]
    fn direction_mismatch_is_malformed() {
        let d = PartialVolumeDescriptor::new(100, 1, 1);
        assert!(!d.is_well_formed());
        assert!(!d.is_within(&available()));
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn negative_delta_walks_backwards() {
        let d = PartialVolumeDescriptor::new(10, 4, -3);
        assert!(d.is_well_formed());
        assert_eq!(d.indices().collect::<Vec<_>>(), vec![10, 7, 4]);
        assert!(d.is_within(&available()));
    }

    #[test]
    fn unreachable_end_is_malformed() {
        assert!(!PartialVolumeDescriptor::new(1, 10, 2).is_well_formed());
        assert!(PartialVolumeDescriptor::new(1, 9, 2).is_well_formed());
    }

    #[test]
    fn zero_delta_and_non_positive_bounds_are_malformed() {
        assert!(!PartialVolumeDescriptor::new(1, 1, 0).is_well_formed());
        assert!(!PartialVolumeDescriptor::new(0, 5, 1).is_well_formed());
        assert!(!PartialVolumeDescriptor::new(-4, -1, 1).is_well_formed());
    }

    #[test]
    fn single_image_selection() {
        let d = PartialVolumeDescriptor::new(7, 7, 1);
        assert!(d.is_well_formed());
        assert_eq!(d.indices().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn strided_selection_skips_holes() {
        let gappy: MultiRange = "1,3,5,7,9".parse().unwrap();
        assert!(PartialVolumeDescriptor::new(1, 9, 2).is_within(&gappy));
        assert!(!PartialVolumeDescriptor::new(1, 3, 1).is_within(&gappy));
    }
}

use std::fmt;

use seeker_model::FrequencyBand;

/// One closed frequency interval in MHz.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Interval {
    pub low_mhz: f64,
    pub high_mhz: f64,
}

impl Interval {
    pub fn new(low_mhz: f64, high_mhz: f64) -> Self {
        debug_assert!(low_mhz <= high_mhz);
        Self { low_mhz, high_mhz }
    }

    pub fn width_mhz(&self) -> f64 {
        self.high_mhz - self.low_mhz
    }

    pub fn contains(&self, freq_mhz: f64) -> bool {
        freq_mhz >= self.low_mhz && freq_mhz <= self.high_mhz
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        other.low_mhz >= self.low_mhz && other.high_mhz <= self.high_mhz
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.low_mhz <= other.high_mhz && other.low_mhz <= self.high_mhz
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}-{:.6}", self.low_mhz, self.high_mhz)
    }
}

/// A union of closed frequency intervals.
///
/// Invariant: intervals are sorted ascending and strictly non-overlapping
/// (touching intervals are merged). Every mutating operation restores the
/// invariant before returning.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObsRange {
    intervals: Vec<Interval>,
}

impl ObsRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_interval(low_mhz: f64, high_mhz: f64) -> Self {
        let mut range = Self::new();
        range.add(low_mhz, high_mhz);
        range
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn min_value(&self) -> Option<f64> {
        self.intervals.first().map(|r| r.low_mhz)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.intervals.last().map(|r| r.high_mhz)
    }

    /// Add `[low, high]`, merging with anything it touches.
    pub fn add(&mut self, low_mhz: f64, high_mhz: f64) {
        if high_mhz < low_mhz {
            return;
        }
        let mut merged = Interval::new(low_mhz, high_mhz);
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        let mut placed = false;
        for iv in &self.intervals {
            if iv.high_mhz < merged.low_mhz {
                out.push(*iv);
            } else if iv.low_mhz > merged.high_mhz {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*iv);
            } else {
                merged = Interval::new(
                    merged.low_mhz.min(iv.low_mhz),
                    merged.high_mhz.max(iv.high_mhz),
                );
            }
        }
        if !placed {
            out.push(merged);
        }
        self.intervals = out;
    }

    pub fn add_band(&mut self, band: &FrequencyBand) {
        self.add(band.low_mhz(), band.high_mhz());
    }

    /// Remove `[low, high]` from the union.
    pub fn subtract(&mut self, low_mhz: f64, high_mhz: f64) {
        if high_mhz < low_mhz {
            return;
        }
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        for iv in &self.intervals {
            if iv.high_mhz < low_mhz || iv.low_mhz > high_mhz {
                out.push(*iv);
                continue;
            }
            if iv.low_mhz < low_mhz {
                out.push(Interval::new(iv.low_mhz, low_mhz));
            }
            if iv.high_mhz > high_mhz {
                out.push(Interval::new(high_mhz, iv.high_mhz));
            }
        }
        self.intervals = out;
    }

    pub fn subtract_band(&mut self, band: &FrequencyBand) {
        self.subtract(band.low_mhz(), band.high_mhz());
    }

    pub fn subtract_range(&mut self, other: &ObsRange) {
        for iv in &other.intervals {
            self.subtract(iv.low_mhz, iv.high_mhz);
        }
    }

    pub fn intersect(&self, other: &ObsRange) -> ObsRange {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if a.overlaps(b) {
                    out.push(Interval::new(
                        a.low_mhz.max(b.low_mhz),
                        a.high_mhz.min(b.high_mhz),
                    ));
                }
            }
        }
        ObsRange { intervals: out }
    }

    pub fn includes_value(&self, freq_mhz: f64) -> bool {
        self.intervals.iter().any(|iv| iv.contains(freq_mhz))
    }

    /// True iff `[low, high]` lies entirely inside one stored interval.
    pub fn includes(&self, low_mhz: f64, high_mhz: f64) -> bool {
        self.intervals
            .iter()
            .any(|iv| iv.contains_interval(&Interval::new(low_mhz, high_mhz)))
    }

    pub fn includes_range(&self, other: &ObsRange) -> bool {
        other
            .intervals
            .iter()
            .all(|iv| self.includes(iv.low_mhz, iv.high_mhz))
    }

    /// First interval lying strictly above `freq_mhz`.
    pub fn above_range(&self, freq_mhz: f64) -> Option<&Interval> {
        self.intervals.iter().find(|iv| iv.low_mhz > freq_mhz)
    }

    pub fn total_bandwidth_mhz(&self) -> f64 {
        self.intervals.iter().map(Interval::width_mhz).sum()
    }

    /// Bandwidth of this union restricted to `within`.
    pub fn useable_bandwidth_mhz(&self, within: &Interval) -> f64 {
        self.intervals
            .iter()
            .filter(|iv| iv.overlaps(within))
            .map(|iv| iv.high_mhz.min(within.high_mhz) - iv.low_mhz.max(within.low_mhz))
            .sum()
    }

    /// Drop every interval narrower than `min_width_mhz`.
    pub fn remove_intervals_smaller_than(&mut self, min_width_mhz: f64) {
        self.intervals.retain(|iv| iv.width_mhz() >= min_width_mhz);
    }

    /// Lowest interval at least `min_width_mhz` wide.
    pub fn first_interval_at_least(&self, min_width_mhz: f64) -> Option<&Interval> {
        self.intervals.iter().find(|iv| iv.width_mhz() >= min_width_mhz)
    }
}

impl fmt::Display for ObsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return write!(f, "<empty>");
        }
        let parts: Vec<String> = self.intervals.iter().map(|iv| iv.to_string()).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl FromIterator<Interval> for ObsRange {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        let mut range = ObsRange::new();
        for iv in iter {
            range.add(iv.low_mhz, iv.high_mhz);
        }
        range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intervals(range: &ObsRange) -> Vec<(f64, f64)> {
        range
            .intervals()
            .iter()
            .map(|iv| (iv.low_mhz, iv.high_mhz))
            .collect()
    }

    #[test]
    fn add_merges_overlaps_and_touches() {
        let mut range = ObsRange::new();
        range.add(1410.0, 1420.0);
        range.add(1430.0, 1440.0);
        range.add(1420.0, 1430.0);
        assert_eq!(intervals(&range), vec![(1410.0, 1440.0)]);
    }

    #[test]
    fn add_keeps_sorted_disjoint_order() {
        let mut range = ObsRange::new();
        range.add(1600.0, 1610.0);
        range.add(1410.0, 1420.0);
        range.add(1500.0, 1510.0);
        assert_eq!(
            intervals(&range),
            vec![(1410.0, 1420.0), (1500.0, 1510.0), (1600.0, 1610.0)]
        );
    }

    #[test]
    fn subtract_splits_an_interval() {
        let mut range = ObsRange::from_interval(1410.0, 1730.0);
        range.subtract(1500.0, 1510.0);
        assert_eq!(
            intervals(&range),
            vec![(1410.0, 1500.0), (1510.0, 1730.0)]
        );
        assert!(!range.includes_value(1505.0));
        assert!(range.includes_value(1500.0));
    }

    #[test]
    fn inclusion_requires_a_single_interval() {
        let mut range = ObsRange::from_interval(1410.0, 1730.0);
        range.subtract(1500.0, 1510.0);
        assert!(range.includes(1410.0, 1499.0));
        // Spans the hole, so not included even though both edges are.
        assert!(!range.includes(1490.0, 1520.0));
    }

    #[test]
    fn above_range_finds_the_next_subrange() {
        let mut range = ObsRange::from_interval(1410.0, 1730.0);
        range.subtract(1500.0, 1510.0);
        let next = range.above_range(1500.0).unwrap();
        assert_eq!(next.low_mhz, 1510.0);
        assert!(range.above_range(1720.0).is_none());
    }

    #[test]
    fn useable_bandwidth_clips_to_the_window() {
        let mut range = ObsRange::from_interval(1410.0, 1730.0);
        range.subtract(1500.0, 1510.0);
        let within = Interval::new(1490.0, 1530.0);
        let usable = range.useable_bandwidth_mhz(&within);
        assert!((usable - 30.0).abs() < 1e-9);
    }

    #[test]
    fn intersect_is_commutative_on_these_inputs() {
        let a = ObsRange::from_interval(1410.0, 1500.0);
        let mut b = ObsRange::from_interval(1450.0, 1600.0);
        b.add(1700.0, 1800.0);
        let left = a.intersect(&b);
        let right = b.intersect(&a);
        assert_eq!(intervals(&left), vec![(1450.0, 1500.0)]);
        assert_eq!(left, right);
    }
}

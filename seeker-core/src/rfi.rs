use seeker_model::FrequencyBand;

use crate::error::{CoreError, Result};
use crate::obs_range::ObsRange;

/// Builder for the recent-RFI mask sent to detectors before an observation.
#[derive(Debug)]
pub struct RecentRfiMask;

impl RecentRfiMask {
    /// Consolidate a sorted list of observed signal frequencies into mask
    /// elements of at least `min_width_mhz`. Signals closer than half the
    /// minimum width merge into a single wider element, and every signal
    /// ends up at least half the minimum width from its element's edges.
    pub fn create_mask(
        signal_freq_mhz: &[f64],
        min_width_mhz: f64,
    ) -> Result<Vec<FrequencyBand>> {
        if signal_freq_mhz.is_empty() {
            return Ok(Vec::new());
        }
        if min_width_mhz <= 0.0 {
            return Err(CoreError::NonPositiveMaskWidth(min_width_mhz));
        }

        let half_min_width = min_width_mhz * 0.5;
        let mut mask: Vec<FrequencyBand> = Vec::new();

        let mut current_center = signal_freq_mhz[0];
        let mut current_width = min_width_mhz;
        let mut previous_freq = -1.0f64;

        for (index, &signal) in signal_freq_mhz.iter().enumerate() {
            if signal < 0.0 {
                return Err(CoreError::NegativeSignalFrequency(signal, index));
            }
            if signal < previous_freq {
                return Err(CoreError::UnsortedSignals(index));
            }
            previous_freq = signal;

            let current_upper_edge = current_center + 0.5 * current_width;
            if signal > current_upper_edge + half_min_width {
                mask.push(FrequencyBand {
                    center_mhz: current_center,
                    width_mhz: current_width,
                });
                current_center = signal;
                current_width = min_width_mhz;
            }

            // Widen the current element so the new signal sits at least
            // half the minimum width inside its upper edge.
            let lower_edge = current_center - 0.5 * current_width;
            let upper_edge = signal + half_min_width;
            current_width = upper_edge - lower_edge;
            current_center = 0.5 * (upper_edge + lower_edge);

            if index == signal_freq_mhz.len() - 1 {
                mask.push(FrequencyBand {
                    center_mhz: current_center,
                    width_mhz: current_width,
                });
            }
        }

        Ok(mask)
    }

    /// The mask as an interval union, for subtraction from observing ranges.
    pub fn as_obs_range(mask: &[FrequencyBand]) -> ObsRange {
        let mut range = ObsRange::new();
        for band in mask {
            range.add_band(band);
        }
        range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    #[test]
    fn empty_signal_list_yields_empty_mask() {
        let mask = RecentRfiMask::create_mask(&[], 0.001).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn two_close_signals_merge_into_one_element() {
        let mask =
            RecentRfiMask::create_mask(&[1420.001_000, 1420.001_300], 0.001).unwrap();
        assert_eq!(mask.len(), 1);
        assert!((mask[0].center_mhz - 1420.001_150).abs() < TOL);
        assert!((mask[0].width_mhz - 0.001_300).abs() < TOL);
    }

    #[test]
    fn two_distant_signals_become_two_elements() {
        let mask =
            RecentRfiMask::create_mask(&[1520.001_000, 1520.003_000], 0.001).unwrap();
        assert_eq!(mask.len(), 2);
        assert!((mask[0].center_mhz - 1520.001_000).abs() < TOL);
        assert!((mask[0].width_mhz - 0.001).abs() < TOL);
        assert!((mask[1].center_mhz - 1520.003_000).abs() < TOL);
        assert!((mask[1].width_mhz - 0.001).abs() < TOL);
    }

    #[test]
    fn single_signal_gets_minimum_width() {
        let mask = RecentRfiMask::create_mask(&[1420.0], 0.002).unwrap();
        assert_eq!(mask.len(), 1);
        assert!((mask[0].center_mhz - 1420.0).abs() < TOL);
        assert!((mask[0].width_mhz - 0.002).abs() < TOL);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(
            RecentRfiMask::create_mask(&[1420.0], 0.0),
            Err(CoreError::NonPositiveMaskWidth(_))
        ));
        assert!(matches!(
            RecentRfiMask::create_mask(&[-1.0], 0.001),
            Err(CoreError::NegativeSignalFrequency(_, 0))
        ));
        assert!(matches!(
            RecentRfiMask::create_mask(&[1420.0, 1419.0], 0.001),
            Err(CoreError::UnsortedSignals(1))
        ));
    }

    #[test]
    fn every_signal_is_covered_with_margin() {
        let signals = [
            1420.000_0, 1420.000_4, 1420.000_9, 1420.010_0, 1420.020_0,
        ];
        let min_width = 0.001;
        let mask = RecentRfiMask::create_mask(&signals, min_width).unwrap();
        for &signal in &signals {
            let covered = mask.iter().any(|band| {
                signal >= band.low_mhz() + min_width / 2.0 - TOL
                    && signal <= band.high_mhz() - min_width / 2.0 + TOL
            });
            assert!(covered, "signal {signal} not covered with margin");
        }
    }
}

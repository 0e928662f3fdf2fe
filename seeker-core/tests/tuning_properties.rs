//! Property tests for detector frequency assignment.

use proptest::prelude::*;
use seeker_core::{DetectorSlot, ObsRange, ObsRangeTuner, TuneDetectors};

/// Edge tolerance the tuner allows when butting a channel against a mask.
const EDGE_TOLERANCE_MHZ: f64 = 0.02;

fn slots(n: usize, bandwidth_mhz: f64) -> Vec<DetectorSlot> {
    (0..n)
        .map(|i| DetectorSlot::new(format!("dx{i}"), bandwidth_mhz))
        .collect()
}

prop_compose! {
    fn masked_range()(
        masks in proptest::collection::vec((1410.0f64..1720.0, 0.1f64..5.0), 0..6)
    ) -> ObsRange {
        let mut range = ObsRange::from_interval(1410.0, 1730.0);
        for (low, width) in masks {
            range.subtract(low, low + width);
        }
        range
    }
}

proptest! {
    #[test]
    fn assignments_are_ordered_clear_of_dc_and_inside_the_range(
        range in masked_range(),
        n_detectors in 1usize..16,
        total_channels in 32i32..512,
    ) {
        prop_assume!(!range.is_empty());
        let mhz_per_channel = 0.1;
        let mut tuner = ObsRangeTuner::new(range.clone()).unwrap();
        let mut detectors = slots(n_detectors, mhz_per_channel);
        tuner.tune_channelized(&mut detectors, total_channels, mhz_per_channel);

        let assigned: Vec<_> = detectors
            .iter()
            .filter_map(|slot| slot.assignment)
            .collect();

        // Strictly increasing in both channel index and center frequency.
        for pair in assigned.windows(2) {
            prop_assert!(pair[1].channel > pair[0].channel);
            prop_assert!(pair[1].center_freq_mhz > pair[0].center_freq_mhz);
        }

        // Never the DC channel.
        let dc = total_channels / 2;
        for a in &assigned {
            prop_assert!(a.channel != dc, "assignment on DC channel {dc}");
        }

        // Spread never exceeds the channelizer width.
        if let (Some(first), Some(last)) = (assigned.first(), assigned.last()) {
            let spread = last.center_freq_mhz - first.center_freq_mhz;
            prop_assert!(spread <= f64::from(total_channels) * mhz_per_channel + 1e-9);
        }

        // Every assigned channel fits the unmasked spectrum up to the edge
        // tolerance.
        let half = mhz_per_channel / 2.0;
        for a in &assigned {
            prop_assert!(
                range.includes(
                    a.center_freq_mhz - half + EDGE_TOLERANCE_MHZ,
                    a.center_freq_mhz + half - EDGE_TOLERANCE_MHZ,
                ),
                "assignment {a:?} overlaps a masked band"
            );
        }

        // Assigned detectors form a prefix: once one is skipped, the rest
        // stay unassigned.
        let mut seen_unassigned = false;
        for slot in &detectors {
            if slot.assignment.is_none() {
                seen_unassigned = true;
            } else {
                prop_assert!(!seen_unassigned);
            }
        }
    }

    #[test]
    fn spread_tuning_honours_its_limits(
        range in masked_range(),
        n_detectors in 1usize..12,
        max_spread in 5.0f64..80.0,
        max_sky_freq in 1500.0f64..1730.0,
    ) {
        prop_assume!(!range.is_empty());
        let mut tuner = ObsRangeTuner::new(range).unwrap();
        let mut detectors = slots(n_detectors, 2.1);
        tuner.tune_spread(&mut detectors, max_spread, max_sky_freq);

        let centers: Vec<f64> = detectors
            .iter()
            .filter_map(|slot| slot.assignment.map(|a| a.center_freq_mhz))
            .collect();

        for pair in centers.windows(2) {
            prop_assert!(pair[1] > pair[0]);
        }
        if let (Some(first), Some(last)) = (centers.first(), centers.last()) {
            prop_assert!(last - first < max_spread);
        }
        for center in &centers {
            prop_assert!(*center < max_sky_freq);
        }
    }
}

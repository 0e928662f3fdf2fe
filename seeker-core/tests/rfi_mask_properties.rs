//! Property tests for the recent-RFI mask builder.

use proptest::prelude::*;
use seeker_core::RecentRfiMask;

const TOL: f64 = 1e-9;

prop_compose! {
    fn signal_list()(
        mut raw in proptest::collection::vec(1000.0f64..2000.0, 0..40)
    ) -> Vec<f64> {
        raw.sort_by(|a, b| a.partial_cmp(b).unwrap());
        raw
    }
}

proptest! {
    #[test]
    fn mask_elements_are_sorted_wide_enough_and_disjoint(
        signals in signal_list(),
        min_width in 0.0001f64..0.5,
    ) {
        let mask = RecentRfiMask::create_mask(&signals, min_width).unwrap();

        // Sorted ascending by center frequency.
        for pair in mask.windows(2) {
            prop_assert!(pair[0].center_mhz <= pair[1].center_mhz);
        }

        // Every element at least the minimum width.
        for band in &mask {
            prop_assert!(band.width_mhz >= min_width - TOL);
        }

        // Successive elements do not overlap.
        for pair in mask.windows(2) {
            prop_assert!(pair[0].high_mhz() <= pair[1].low_mhz() + TOL);
        }

        // Every signal is inside some element.
        for &signal in &signals {
            let covered = mask
                .iter()
                .any(|band| signal >= band.low_mhz() - TOL && signal <= band.high_mhz() + TOL);
            prop_assert!(covered, "signal {} escaped the mask", signal);
        }

        // An empty input is the only way to get an empty mask.
        prop_assert_eq!(mask.is_empty(), signals.is_empty());
    }

    #[test]
    fn merged_signals_keep_the_halfwidth_margin(
        signals in signal_list(),
        min_width in 0.001f64..0.1,
    ) {
        let mask = RecentRfiMask::create_mask(&signals, min_width).unwrap();
        // Each signal sits at least half the minimum width from the upper
        // edge of its element (the walk extends elements upward).
        for &signal in &signals {
            let ok = mask.iter().any(|band| {
                signal >= band.low_mhz() - TOL
                    && band.high_mhz() - signal >= min_width / 2.0 - TOL
            });
            prop_assert!(ok);
        }
    }
}

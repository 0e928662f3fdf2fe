//! Property tests for the frequency-interval union.

use proptest::prelude::*;
use seeker_core::ObsRange;

#[derive(Debug, Clone)]
enum Op {
    Add(f64, f64),
    Subtract(f64, f64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let edges = (1000.0f64..2000.0, 0.01f64..50.0);
    prop_oneof![
        edges.clone().prop_map(|(low, width)| Op::Add(low, low + width)),
        edges.prop_map(|(low, width)| Op::Subtract(low, low + width)),
    ]
}

proptest! {
    #[test]
    fn intervals_stay_sorted_and_disjoint(
        ops in proptest::collection::vec(op_strategy(), 0..60)
    ) {
        let mut range = ObsRange::new();
        for op in &ops {
            match *op {
                Op::Add(low, high) => range.add(low, high),
                Op::Subtract(low, high) => range.subtract(low, high),
            }
        }

        let intervals = range.intervals();
        for iv in intervals {
            prop_assert!(iv.low_mhz <= iv.high_mhz);
        }
        for pair in intervals.windows(2) {
            // Sorted and strictly non-overlapping with a gap between them
            // (touching intervals must have merged on add).
            prop_assert!(pair[0].high_mhz < pair[1].low_mhz);
        }
    }

    #[test]
    fn inclusion_matches_pointwise_membership(
        ops in proptest::collection::vec(op_strategy(), 1..40),
        probe_low in 1000.0f64..2000.0,
        probe_width in 0.01f64..10.0,
    ) {
        let mut range = ObsRange::new();
        for op in &ops {
            match *op {
                Op::Add(low, high) => range.add(low, high),
                Op::Subtract(low, high) => range.subtract(low, high),
            }
        }

        let probe_high = probe_low + probe_width;
        let included = range.includes(probe_low, probe_high);

        // includes(r) implies r is inside one stored interval, so every
        // sample point of r is a member.
        if included {
            let step = probe_width / 16.0;
            let mut freq = probe_low;
            while freq <= probe_high {
                prop_assert!(range.includes_value(freq));
                freq += step;
            }
        }

        // And the converse at the edges: if either edge is outside, the
        // probe cannot be included.
        if !range.includes_value(probe_low) || !range.includes_value(probe_high) {
            prop_assert!(!included);
        }
    }

    #[test]
    fn add_then_subtract_removes_coverage(
        low in 1000.0f64..2000.0,
        width in 0.01f64..50.0,
    ) {
        let high = low + width;
        let mut range = ObsRange::new();
        range.add(low, high);
        range.subtract(low, high);
        prop_assert!(range.is_empty());
    }

    #[test]
    fn total_bandwidth_is_the_sum_of_widths(
        ops in proptest::collection::vec(op_strategy(), 0..40)
    ) {
        let mut range = ObsRange::new();
        for op in &ops {
            match *op {
                Op::Add(low, high) => range.add(low, high),
                Op::Subtract(low, high) => range.subtract(low, high),
            }
        }
        let summed: f64 = range
            .intervals()
            .iter()
            .map(|iv| iv.high_mhz - iv.low_mhz)
            .sum();
        prop_assert!((range.total_bandwidth_mhz() - summed).abs() < 1e-9);
    }
}

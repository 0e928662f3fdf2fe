use bitflags::bitflags;

bitflags! {
    /// Which operations an activity performs. The strategy composes these
    /// per activity kind; stage handlers consult them before commanding
    /// hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActivityOps: u32 {
        const USE_TSCOPE      = 1 << 0;
        const USE_IFC         = 1 << 1;
        const USE_DETECTOR    = 1 << 2;
        const USE_TESTGEN     = 1 << 3;
        const USE_CHANNELIZER = 1 << 4;
        const FOLLOW_UP       = 1 << 5;
        const OFF_OBS         = 1 << 6;
        const GRID_WEST       = 1 << 7;
        const GRID_SOUTH      = 1 << 8;
        const GRID_ON         = 1 << 9;
        const GRID_NORTH      = 1 << 10;
        const GRID_EAST       = 1 << 11;
        const MULTITARGET     = 1 << 12;
        const RF_TONE         = 1 << 13;
        const CREATE_RECENT_RFI_MASK = 1 << 14;
    }
}

impl ActivityOps {
    /// The standard multi-target sky observation.
    pub fn target_observation() -> Self {
        ActivityOps::USE_TSCOPE
            | ActivityOps::USE_IFC
            | ActivityOps::USE_DETECTOR
            | ActivityOps::USE_CHANNELIZER
            | ActivityOps::MULTITARGET
            | ActivityOps::CREATE_RECENT_RFI_MASK
    }

    /// Followup re-observation of candidate signals.
    pub fn followup_observation() -> Self {
        Self::target_observation() | ActivityOps::FOLLOW_UP
    }

    /// An OFF pointing to discriminate sky-fixed signals.
    pub fn off_observation() -> Self {
        Self::target_observation() | ActivityOps::OFF_OBS
    }

    /// Calibration run with the test signal generator.
    pub fn test_signal_calibration() -> Self {
        ActivityOps::USE_IFC
            | ActivityOps::USE_DETECTOR
            | ActivityOps::USE_TESTGEN
            | ActivityOps::RF_TONE
    }

    /// One of the five grid pointings around a confirmed candidate.
    pub fn grid_observation(direction: ActivityOps) -> Self {
        Self::target_observation() | direction
    }

    pub fn is_grid(&self) -> bool {
        self.intersects(
            ActivityOps::GRID_WEST
                | ActivityOps::GRID_SOUTH
                | ActivityOps::GRID_ON
                | ActivityOps::GRID_NORTH
                | ActivityOps::GRID_EAST,
        )
    }

    pub fn grid_offset_beamsizes(&self) -> Option<(f64, f64)> {
        // (east-west, north-south) offsets in synth beamsizes.
        if self.contains(ActivityOps::GRID_WEST) {
            Some((-1.0, 0.0))
        } else if self.contains(ActivityOps::GRID_EAST) {
            Some((1.0, 0.0))
        } else if self.contains(ActivityOps::GRID_SOUTH) {
            Some((0.0, -1.0))
        } else if self.contains(ActivityOps::GRID_NORTH) {
            Some((0.0, 1.0))
        } else if self.contains(ActivityOps::GRID_ON) {
            Some((0.0, 0.0))
        } else {
            None
        }
    }
}

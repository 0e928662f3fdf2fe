use std::fmt;

use crate::obs_range::{Interval, ObsRange};

/// A channel/center-frequency assignment for one detector.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectorAssignment {
    pub channel: i32,
    pub center_freq_mhz: f64,
}

/// One detector as the tuner sees it: a fixed-bandwidth channel consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSlot {
    pub name: String,
    pub bandwidth_mhz: f64,
    pub assignment: Option<DetectorAssignment>,
}

impl DetectorSlot {
    pub fn new(name: impl Into<String>, bandwidth_mhz: f64) -> Self {
        Self {
            name: name.into(),
            bandwidth_mhz,
            assignment: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assignment.is_some()
    }

    fn mark_not_in_use(&mut self) {
        self.assignment = None;
    }
}

/// Rounding policy applied to candidate center frequencies.
pub trait Round: fmt::Debug + Send {
    fn round(&self, freq_mhz: f64) -> f64;
}

/// Pass frequencies through untouched.
#[derive(Debug, Default)]
pub struct NoRound;

impl Round for NoRound {
    fn round(&self, freq_mhz: f64) -> f64 {
        freq_mhz
    }
}

/// Round downward to the nearest multiple of a resolution. Resolutions near
/// zero (well below Hz tolerance) disable rounding.
#[derive(Debug)]
pub struct RoundToValue {
    round_value_mhz: f64,
}

impl RoundToValue {
    const MIN_ROUND_VALUE: f64 = 1e-30;

    pub fn new(round_value_mhz: f64) -> Self {
        Self { round_value_mhz }
    }
}

impl Round for RoundToValue {
    fn round(&self, freq_mhz: f64) -> f64 {
        if self.round_value_mhz.abs() >= Self::MIN_ROUND_VALUE {
            (freq_mhz / self.round_value_mhz).floor() * self.round_value_mhz
        } else {
            freq_mhz
        }
    }
}

/// Assigns channels and center frequencies to a set of detectors.
///
/// Both entry points leave unassigned detectors marked not-in-use and keep
/// assigned detectors strictly ordered by increasing center frequency.
pub trait TuneDetectors: Send {
    /// Channelized assignment: `total_channels` channels of
    /// `mhz_per_channel` each, skipping the DC channel.
    fn tune_channelized(
        &mut self,
        slots: &mut [DetectorSlot],
        total_channels: i32,
        mhz_per_channel: f64,
    );

    /// Free-running assignment limited by a maximum tuning spread and an
    /// absolute sky-frequency ceiling.
    fn tune_spread(
        &mut self,
        slots: &mut [DetectorSlot],
        max_spread_mhz: f64,
        max_sky_freq_mhz: f64,
    );

    /// Whether another activity would still find unassigned spectrum.
    fn more_activities_to_run(&self) -> bool;
}

/// Re-apply assignments from a previous observation, keyed by detector
/// name. Detectors with no prior assignment stay not-in-use; prior
/// assignments for detectors no longer present are dropped.
pub fn apply_previous_assignments(
    slots: &mut [DetectorSlot],
    previous: &std::collections::HashMap<String, DetectorAssignment>,
) {
    for slot in slots.iter_mut() {
        slot.assignment = previous.get(&slot.name).copied();
    }
}

/// Tuner over a single contiguous range; the range's low edge is the left
/// edge of the first channel.
#[derive(Debug)]
pub struct RangeTuner {
    range: Interval,
    next_freq_mhz: f64,
}

impl RangeTuner {
    pub fn new(range: Interval) -> Self {
        let next_freq_mhz = range.low_mhz;
        Self {
            range,
            next_freq_mhz,
        }
    }
}

impl TuneDetectors for RangeTuner {
    fn tune_channelized(
        &mut self,
        slots: &mut [DetectorSlot],
        total_channels: i32,
        mhz_per_channel: f64,
    ) {
        let max_allowed_sky_freq_mhz =
            self.next_freq_mhz + f64::from(total_channels) * mhz_per_channel;
        let max_spread_mhz = f64::from(total_channels) * mhz_per_channel;

        for slot in slots.iter_mut() {
            slot.mark_not_in_use();
        }

        let total_detectors = slots.len() as i32;
        let mut next_chan = ((total_channels - total_detectors) / 2).max(0);
        let dc_channel = total_channels / 2;
        let first_freq_mhz = self.next_freq_mhz;

        for slot in slots.iter_mut() {
            if next_chan == dc_channel {
                next_chan += 1;
                self.next_freq_mhz += mhz_per_channel;
            }

            if self.next_freq_mhz > self.range.high_mhz {
                break;
            }

            let center_freq = self.next_freq_mhz + slot.bandwidth_mhz / 2.0;
            if center_freq - first_freq_mhz >= max_spread_mhz {
                break;
            }
            if center_freq >= max_allowed_sky_freq_mhz {
                break;
            }

            slot.assignment = Some(DetectorAssignment {
                channel: next_chan,
                center_freq_mhz: center_freq,
            });
            self.next_freq_mhz = center_freq + slot.bandwidth_mhz / 2.0;
            next_chan += 1;
        }
    }

    fn tune_spread(
        &mut self,
        slots: &mut [DetectorSlot],
        max_spread_mhz: f64,
        max_sky_freq_mhz: f64,
    ) {
        for slot in slots.iter_mut() {
            slot.mark_not_in_use();
        }

        let first_freq_mhz = self.next_freq_mhz;
        let mut channel = 0;
        for slot in slots.iter_mut() {
            if self.next_freq_mhz > self.range.high_mhz {
                break;
            }
            let center_freq = self.next_freq_mhz + slot.bandwidth_mhz / 2.0;
            if center_freq - first_freq_mhz >= max_spread_mhz {
                break;
            }
            if center_freq >= max_sky_freq_mhz {
                break;
            }
            slot.assignment = Some(DetectorAssignment {
                channel,
                center_freq_mhz: center_freq,
            });
            self.next_freq_mhz = center_freq + slot.bandwidth_mhz / 2.0;
            channel += 1;
        }
    }

    fn more_activities_to_run(&self) -> bool {
        self.next_freq_mhz <= self.range.high_mhz
    }
}

/// Tuner over a union of sub-ranges (the usable spectrum after permanent
/// RFI masking), with DC-channel skipping and channel-grid alignment when
/// hopping between sub-ranges.
#[derive(Debug)]
pub struct ObsRangeTuner {
    obs_range: ObsRange,
    next_left_edge_freq_mhz: f64,
    round: Box<dyn Round>,
}

/// Margin pulled in from both channel edges when testing sub-range
/// inclusion, so a channel butted against a mask edge still fits.
const EDGE_TOLERANCE_MHZ: f64 = 0.02;

impl ObsRangeTuner {
    pub fn new(obs_range: ObsRange) -> crate::error::Result<Self> {
        Self::with_round(obs_range, Box::new(NoRound))
    }

    pub fn with_round(
        obs_range: ObsRange,
        round: Box<dyn Round>,
    ) -> crate::error::Result<Self> {
        let next_left_edge_freq_mhz = obs_range
            .min_value()
            .ok_or(crate::error::CoreError::EmptyObsRange)?;
        Ok(Self {
            obs_range,
            next_left_edge_freq_mhz,
            round,
        })
    }

    fn channel_fits(&self, center_freq: f64, half_bandwidth: f64) -> bool {
        self.obs_range.includes(
            center_freq - half_bandwidth + EDGE_TOLERANCE_MHZ,
            center_freq + half_bandwidth - EDGE_TOLERANCE_MHZ,
        )
    }
}

impl TuneDetectors for ObsRangeTuner {
    fn tune_channelized(
        &mut self,
        slots: &mut [DetectorSlot],
        total_channels: i32,
        mhz_per_channel: f64,
    ) {
        let max_allowed_sky_freq_mhz =
            self.next_left_edge_freq_mhz + f64::from(total_channels) * mhz_per_channel;
        let max_spread_mhz = f64::from(total_channels) * mhz_per_channel;

        for slot in slots.iter_mut() {
            slot.mark_not_in_use();
        }

        let dc_channel = total_channels / 2;
        let half_bandwidth = mhz_per_channel / 2.0;
        let mut next_chan: i32 = -1;
        // First assignment anchors the channel grid and the spread limit.
        let mut first_assigned: Option<DetectorAssignment> = None;

        'slots: for index in 0..slots.len() {
            let mut center_freq;
            loop {
                center_freq = self.next_left_edge_freq_mhz + half_bandwidth;
                self.next_left_edge_freq_mhz += mhz_per_channel;
                next_chan += 1;

                if next_chan == dc_channel {
                    center_freq += mhz_per_channel;
                    self.next_left_edge_freq_mhz += mhz_per_channel;
                    next_chan += 1;
                }

                if !self
                    .obs_range
                    .includes_value(self.next_left_edge_freq_mhz)
                {
                    // The channel's upper edge left the current sub-range;
                    // hop to the next sub-range on a channel boundary.
                    let Some(next_range) =
                        self.obs_range.above_range(self.next_left_edge_freq_mhz)
                    else {
                        break 'slots;
                    };
                    let next_range = *next_range;

                    let channels_to_skip = (next_range.low_mhz + half_bandwidth
                        - self.next_left_edge_freq_mhz)
                        / mhz_per_channel;
                    self.next_left_edge_freq_mhz +=
                        (channels_to_skip + 0.25).trunc() * mhz_per_channel;
                    center_freq = self.next_left_edge_freq_mhz + half_bandwidth;
                    self.next_left_edge_freq_mhz += mhz_per_channel;

                    if let Some(first) = first_assigned {
                        let low_freq_mhz = first.center_freq_mhz - half_bandwidth;
                        let channels_from_first = (self.next_left_edge_freq_mhz
                            - first.center_freq_mhz
                            + half_bandwidth)
                            / mhz_per_channel;
                        next_chan = first.channel + channels_from_first as i32;
                        if next_chan == dc_channel {
                            center_freq += mhz_per_channel;
                            self.next_left_edge_freq_mhz += mhz_per_channel;
                            next_chan += 1;
                        }
                        if self.next_left_edge_freq_mhz - low_freq_mhz > max_spread_mhz {
                            break 'slots;
                        }
                    }
                }

                if self.channel_fits(center_freq, half_bandwidth) {
                    break;
                }
            }

            if center_freq > max_allowed_sky_freq_mhz {
                break;
            }

            let assignment = DetectorAssignment {
                channel: next_chan,
                center_freq_mhz: center_freq,
            };
            slots[index].assignment = Some(assignment);
            if first_assigned.is_none() {
                first_assigned = Some(assignment);
            } else if let Some(first) = first_assigned {
                // Keep the next candidate inside the tuning spread too.
                let high_freq_mhz = self.next_left_edge_freq_mhz + mhz_per_channel;
                let low_freq_mhz = first.center_freq_mhz - half_bandwidth;
                if high_freq_mhz - low_freq_mhz > max_spread_mhz {
                    break;
                }
            }
        }
    }

    fn tune_spread(
        &mut self,
        slots: &mut [DetectorSlot],
        max_spread_mhz: f64,
        max_sky_freq_mhz: f64,
    ) {
        for slot in slots.iter_mut() {
            slot.mark_not_in_use();
        }

        let mut first_center: Option<f64> = None;
        let mut channel = 0;

        'slots: for index in 0..slots.len() {
            let half_bandwidth = slots[index].bandwidth_mhz / 2.0;
            let mut center_freq;
            loop {
                center_freq = self
                    .round
                    .round(self.next_left_edge_freq_mhz + half_bandwidth);
                self.next_left_edge_freq_mhz = center_freq + half_bandwidth;

                if !self
                    .obs_range
                    .includes_value(self.next_left_edge_freq_mhz)
                {
                    let Some(next_range) =
                        self.obs_range.above_range(self.next_left_edge_freq_mhz)
                    else {
                        break 'slots;
                    };
                    self.next_left_edge_freq_mhz = next_range.low_mhz;
                    continue;
                }

                if self.channel_fits(center_freq, half_bandwidth) {
                    break;
                }
            }

            if let Some(first) = first_center {
                if center_freq - first >= max_spread_mhz {
                    break;
                }
            }
            if center_freq >= max_sky_freq_mhz {
                break;
            }

            slots[index].assignment = Some(DetectorAssignment {
                channel,
                center_freq_mhz: center_freq,
            });
            if first_center.is_none() {
                first_center = Some(center_freq);
            }
            channel += 1;
        }
    }

    fn more_activities_to_run(&self) -> bool {
        match self.obs_range.max_value() {
            Some(max) => self.next_left_edge_freq_mhz <= max,
            None => false,
        }
    }
}

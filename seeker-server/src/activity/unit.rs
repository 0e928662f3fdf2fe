//! Per-detector bookkeeping within one activity.

use std::collections::HashMap;

use parking_lot::Mutex;
use seeker_core::DetectorAssignment;
use seeker_model::{BeamNumber, DetectorNumber, TargetId};

/// Lifecycle of one detector's participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Ready,
    DataCollection,
    SignalDetection,
    SendingResults,
    Complete,
    Failed,
}

/// Accumulated statistics reported by a detector for the observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitStats {
    pub candidates: u32,
    pub signals: u32,
    pub confirmed: u32,
}

/// One detector's state within an activity.
#[derive(Debug, Clone)]
pub struct ActivityUnit {
    pub detector_name: String,
    pub detector_number: DetectorNumber,
    pub beam: BeamNumber,
    pub target: TargetId,
    pub primary_target: TargetId,
    pub tuning: Option<DetectorAssignment>,
    pub bandwidth_mhz: f64,
    pub state: UnitState,
    pub stats: UnitStats,
    /// Cleared when the unit's component disconnects mid-activity; such
    /// units get no ObsHistory row.
    pub valid_observation: bool,
    /// Milestone bits already counted, so re-sent reports never double
    /// bump a counter.
    milestones: u8,
}

const M_READY: u8 = 1 << 0;
const M_TUNED: u8 = 1 << 7;
const M_DC_STARTED: u8 = 1 << 1;
const M_DC_COMPLETE: u8 = 1 << 2;
const M_SD_STARTED: u8 = 1 << 3;
const M_SD_COMPLETE: u8 = 1 << 4;
const M_SENT_CANDIDATES: u8 = 1 << 5;
const M_COMPLETE: u8 = 1 << 6;

impl ActivityUnit {
    pub fn new(
        detector_name: impl Into<String>,
        detector_number: DetectorNumber,
        beam: BeamNumber,
        target: TargetId,
        primary_target: TargetId,
        bandwidth_mhz: f64,
    ) -> Self {
        Self {
            detector_name: detector_name.into(),
            detector_number,
            beam,
            target,
            primary_target,
            tuning: None,
            bandwidth_mhz,
            state: UnitState::Created,
            stats: UnitStats::default(),
            valid_observation: true,
            milestones: 0,
        }
    }

    pub fn low_freq_mhz(&self) -> Option<f64> {
        self.tuning
            .map(|t| t.center_freq_mhz - self.bandwidth_mhz / 2.0)
    }

    pub fn high_freq_mhz(&self) -> Option<f64> {
        self.tuning
            .map(|t| t.center_freq_mhz + self.bandwidth_mhz / 2.0)
    }
}

/// Counters the machine checks at stage boundaries. The accounting
/// identity `started == working + failed + done` holds at every boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCounters {
    pub started: usize,
    pub ready: usize,
    pub tuned: usize,
    pub data_collection_started: usize,
    pub data_collection_complete: usize,
    pub signal_detection_started: usize,
    pub signal_detection_complete: usize,
    pub done_sending_candidates: usize,
    pub done: usize,
    pub failed: usize,
}

impl UnitCounters {
    pub fn still_working(&self) -> usize {
        self.started - self.failed - self.done
    }
}

/// Mutex-guarded unit collection; every proxy callback and the machine
/// itself go through this wrapper, so counter updates and membership are
/// coherent.
#[derive(Debug, Default)]
pub struct UnitList {
    inner: Mutex<UnitListInner>,
}

#[derive(Debug, Default)]
struct UnitListInner {
    units: HashMap<String, ActivityUnit>,
    counters: UnitCounters,
}

impl UnitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, unit: ActivityUnit) {
        let mut inner = self.inner.lock();
        inner.counters.started += 1;
        inner.units.insert(unit.detector_name.clone(), unit);
    }

    pub fn counters(&self) -> UnitCounters {
        self.inner.lock().counters
    }

    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().units.is_empty()
    }

    /// Number of units that have not failed or finished.
    pub fn surviving(&self) -> usize {
        self.inner.lock().counters.still_working()
    }

    pub fn snapshot(&self) -> Vec<ActivityUnit> {
        let inner = self.inner.lock();
        let mut units: Vec<ActivityUnit> = inner.units.values().cloned().collect();
        units.sort_by(|a, b| a.detector_name.cmp(&b.detector_name));
        units
    }

    pub fn set_tuning(&self, detector_name: &str, tuning: Option<DetectorAssignment>) {
        let mut inner = self.inner.lock();
        if let Some(unit) = inner.units.get_mut(detector_name) {
            unit.tuning = tuning;
        }
    }

    pub fn record_stats(&self, detector_name: &str, stats: UnitStats) {
        let mut inner = self.inner.lock();
        if let Some(unit) = inner.units.get_mut(detector_name) {
            unit.stats = stats;
        }
    }

    fn transition(
        &self,
        detector_name: &str,
        milestone: u8,
        state: UnitState,
        bump: impl FnOnce(&mut UnitCounters),
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(unit) = inner.units.get_mut(detector_name) else {
            return false;
        };
        if unit.state == UnitState::Failed || unit.milestones & milestone != 0 {
            return false;
        }
        unit.milestones |= milestone;
        unit.state = state;
        bump(&mut inner.counters);
        true
    }

    pub fn mark_ready(&self, name: &str) -> bool {
        self.transition(name, M_READY, UnitState::Ready, |c| c.ready += 1)
    }

    pub fn mark_tuned(&self, name: &str) -> bool {
        self.transition(name, M_TUNED, UnitState::Ready, |c| c.tuned += 1)
    }

    pub fn mark_data_collection_started(&self, name: &str) -> bool {
        self.transition(name, M_DC_STARTED, UnitState::DataCollection, |c| {
            c.data_collection_started += 1
        })
    }

    pub fn mark_data_collection_complete(&self, name: &str) -> bool {
        self.transition(name, M_DC_COMPLETE, UnitState::DataCollection, |c| {
            c.data_collection_complete += 1
        })
    }

    pub fn mark_signal_detection_started(&self, name: &str) -> bool {
        self.transition(name, M_SD_STARTED, UnitState::SignalDetection, |c| {
            c.signal_detection_started += 1
        })
    }

    pub fn mark_signal_detection_complete(&self, name: &str) -> bool {
        self.transition(name, M_SD_COMPLETE, UnitState::SignalDetection, |c| {
            c.signal_detection_complete += 1
        })
    }

    pub fn mark_done_sending_candidates(&self, name: &str) -> bool {
        self.transition(name, M_SENT_CANDIDATES, UnitState::SendingResults, |c| {
            c.done_sending_candidates += 1
        })
    }

    pub fn mark_complete(&self, name: &str) -> bool {
        self.transition(name, M_COMPLETE, UnitState::Complete, |c| c.done += 1)
    }

    /// A unit's detector disconnected or errored out; the unit is lost and
    /// its observation is invalid, but the activity continues with the
    /// rest.
    pub fn mark_failed(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(unit) = inner.units.get_mut(name) else {
            return false;
        };
        if unit.state == UnitState::Failed {
            return false;
        }
        unit.state = UnitState::Failed;
        unit.valid_observation = false;
        inner.counters.failed += 1;
        true
    }

    /// Debug-time check of the counter accounting identity.
    pub fn assert_accounting_identity(&self) {
        let counters = self.counters();
        debug_assert!(
            counters.failed + counters.done <= counters.started,
            "unit counters out of balance: {counters:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> ActivityUnit {
        ActivityUnit::new(
            name,
            DetectorNumber(7),
            BeamNumber(1),
            TargetId(42),
            TargetId(9000),
            2.1,
        )
    }

    #[test]
    fn counters_follow_transitions() {
        let list = UnitList::new();
        list.insert(unit("dx1"));
        list.insert(unit("dx2"));

        assert!(list.mark_ready("dx1"));
        // A re-sent ready does not double count.
        assert!(!list.mark_ready("dx1"));
        assert!(list.mark_ready("dx2"));
        assert!(list.mark_failed("dx2"));
        assert!(list.mark_complete("dx1"));

        let counters = list.counters();
        assert_eq!(counters.started, 2);
        assert_eq!(counters.ready, 2);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.done, 1);
        assert_eq!(counters.still_working(), 0);
        list.assert_accounting_identity();
    }

    #[test]
    fn failed_units_ignore_later_transitions() {
        let list = UnitList::new();
        list.insert(unit("dx1"));
        assert!(list.mark_failed("dx1"));
        assert!(!list.mark_failed("dx1"));
        assert!(!list.mark_ready("dx1"));
        assert_eq!(list.counters().ready, 0);
        // The failure cleared the observation validity.
        assert!(!list.snapshot()[0].valid_observation);
    }

    #[test]
    fn unknown_names_do_not_disturb_counters() {
        let list = UnitList::new();
        list.insert(unit("dx1"));
        assert!(!list.mark_ready("dx9"));
        assert_eq!(list.counters().ready, 0);
    }

    #[test]
    fn tuning_edges_come_from_bandwidth() {
        let list = UnitList::new();
        list.insert(unit("dx1"));
        list.set_tuning(
            "dx1",
            Some(seeker_core::DetectorAssignment {
                channel: 12,
                center_freq_mhz: 1420.05,
            }),
        );
        let snapshot = list.snapshot();
        assert!((snapshot[0].low_freq_mhz().unwrap() - 1419.0).abs() < 1e-9);
        assert!((snapshot[0].high_freq_mhz().unwrap() - 1421.1).abs() < 1e-9);
    }
}

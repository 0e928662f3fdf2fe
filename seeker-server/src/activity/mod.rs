//! The observing activity state machine.
//!
//! One [`Activity`] drives a single coordinated observation: it prepares
//! parameters and frequency assignments, starts the non-detector hardware,
//! tunes the detector pool, supervises data collection and signal
//! detection, reports results to the database, and tears everything down.
//! Stages advance on one event queue fed by proxy callbacks and watchdog
//! timers; every stage has a deadline whose expiry fails the activity with
//! a stage-specific reason.

pub mod events;
pub mod ops;
pub mod unit;
pub mod watchdog;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use seeker_contracts::{
    CandidateReport, ComponentContract, DetectorTuneOrder, IfChainCommand,
    TelescopeCommand, TestSignalCommand,
};
use seeker_core::{
    apply_previous_assignments, DetectorAssignment, DetectorSlot, ObsRange,
    ObsRangeTuner, RecentRfiMask, TuneDetectors as _,
};
use seeker_model::{
    ActivityId, BeamNumber, ComponentKind, DetectorNumber, FrequencyBand, TargetId,
    WireTimestamp,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{AppResult, ServerError};
use crate::obs_history::ObsHistory;
use crate::proxy::{
    ChannelizerProxy, DetectorProxy, IfChainProxy, ManagedProxy, TelescopeProxy,
    TestSignalProxy,
};

pub use events::{ActivityEvent, ActivityHandle};
pub use ops::ActivityOps;
pub use unit::{ActivityUnit, UnitCounters, UnitList, UnitState};
use watchdog::Watchdog;

/// Stages of the activity machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    StartComponents,
    TuneDetectors,
    Collect,
    Detect,
    Report,
    Teardown,
}

impl Stage {
    pub fn timeout_reason(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare error",
            Stage::StartComponents => "component ready timeout",
            Stage::TuneDetectors => "detector tune timeout",
            Stage::Collect => "data collection timeout",
            Stage::Detect => "detection timeout",
            Stage::Report => "act-unit complete timeout",
            Stage::Teardown => "teardown",
        }
    }
}

/// Externally visible lifecycle of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Pending,
    Starting,
    WaitingReady,
    Collecting,
    Detecting,
    Reporting,
    Done,
    Failed,
    Stopped,
}

/// Per-stage deadlines, usually mapped from the activity config section.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub component_ready: Duration,
    pub detector_tuned: Duration,
    pub data_collection_margin: Duration,
    pub signal_detection: Duration,
    pub act_unit_complete: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            component_ready: Duration::from_secs(120),
            detector_tuned: Duration::from_secs(60),
            data_collection_margin: Duration::from_secs(60),
            signal_detection: Duration::from_secs(300),
            act_unit_complete: Duration::from_secs(120),
        }
    }
}

/// One beam's pointing assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamTarget {
    pub beam: BeamNumber,
    pub target: TargetId,
    pub primary_target: TargetId,
    pub ra2000_hours: f64,
    pub dec2000_deg: f64,
}

/// Validated inputs for one activity.
#[derive(Debug, Clone)]
pub struct ActivityParams {
    pub id: ActivityId,
    pub activity_type: String,
    pub ops: ActivityOps,
    pub beam_targets: Vec<BeamTarget>,
    /// Detector name -> beam it consumes from.
    pub detector_beams: HashMap<String, BeamNumber>,
    pub chosen_obs_range: ObsRange,

    pub start_time_offset_secs: u32,
    pub data_collection_length_secs: u32,
    pub total_channels: i32,
    pub mhz_per_channel: f64,
    pub timeouts: StageTimeouts,

    /// Sorted recent-signal list for the RFI mask, when the ops include
    /// mask creation.
    pub recent_signals_mhz: Vec<f64>,
    pub min_rfi_mask_element_width_mhz: f64,

    /// Followups re-apply the tuning of the activity they chase.
    pub previous_activity: Option<ActivityId>,
    /// Candidate bodies from the chased activity, forwarded for secondary
    /// processing during Report.
    pub seed_candidates: Vec<(String, Bytes)>,
    pub data_products_dir: std::path::PathBuf,
}

impl ActivityParams {
    /// Parameter validation per the start() contract: failures here mean
    /// no activity is created.
    pub fn validate(&self) -> AppResult<()> {
        if self.beam_targets.is_empty() {
            return Err(ServerError::InvalidParameters(
                "no beam target assignments".to_string(),
            ));
        }
        if self.chosen_obs_range.is_empty() {
            return Err(ServerError::InvalidParameters(
                "empty observation range".to_string(),
            ));
        }
        if self.total_channels <= 0 || self.mhz_per_channel <= 0.0 {
            return Err(ServerError::InvalidParameters(format!(
                "bad channelization: {} channels at {} MHz",
                self.total_channels, self.mhz_per_channel
            )));
        }
        if self.ops.contains(ActivityOps::FOLLOW_UP) && self.previous_activity.is_none() {
            return Err(ServerError::InvalidParameters(
                "followup without a previous activity".to_string(),
            ));
        }
        if self.data_collection_length_secs == 0 {
            return Err(ServerError::InvalidParameters(
                "zero data collection length".to_string(),
            ));
        }
        Ok(())
    }
}

/// The hardware an activity drives, allocated exclusively from the site's
/// managers for the duration of the run. The strategy releases the lists
/// after the outcome is known.
#[derive(Debug, Default)]
pub struct AllocatedComponents {
    pub telescopes: Vec<TelescopeProxy>,
    pub if_chains: Vec<IfChainProxy>,
    pub test_signals: Vec<TestSignalProxy>,
    pub detectors: Vec<DetectorProxy>,
    pub channelizers: Vec<ChannelizerProxy>,
}

impl AllocatedComponents {
    fn attach_all(&self, handle: &ActivityHandle) {
        for proxy in &self.telescopes {
            proxy.inner().attach_activity(handle.clone());
        }
        for proxy in &self.if_chains {
            proxy.inner().attach_activity(handle.clone());
        }
        for proxy in &self.test_signals {
            proxy.inner().attach_activity(handle.clone());
        }
        for proxy in &self.detectors {
            proxy.inner().attach_activity(handle.clone());
        }
        for proxy in &self.channelizers {
            proxy.inner().attach_activity(handle.clone());
        }
    }

    fn detach_all(&self) {
        for proxy in &self.telescopes {
            proxy.inner().detach_activity();
        }
        for proxy in &self.if_chains {
            proxy.inner().detach_activity();
        }
        for proxy in &self.test_signals {
            proxy.inner().detach_activity();
        }
        for proxy in &self.detectors {
            proxy.inner().detach_activity();
        }
        for proxy in &self.channelizers {
            proxy.inner().detach_activity();
        }
    }
}

/// Final report delivered exactly once per activity.
#[derive(Debug, Clone)]
pub struct ActivityOutcome {
    pub id: ActivityId,
    pub state: ActivityState,
    pub failure_reason: Option<String>,
    pub counters: UnitCounters,
    pub start_of_data_collection: Option<DateTime<Utc>>,
    /// Raw candidate bodies collected during Detect, for followups.
    pub candidates: Vec<(String, Bytes)>,
    /// Frequencies of the candidate signals the detectors reported; feeds
    /// the next activity's recent-RFI mask.
    pub candidate_freqs_mhz: Vec<f64>,
    /// `(target, low, high)` coverage actually observed by valid units,
    /// for scheduler replay when the database is off.
    pub unit_coverage: Vec<(TargetId, f64, f64)>,
}

enum StageFlow {
    Done,
    StopRequested,
    TimedOut,
}

/// One observing activity from start through write-out.
pub struct Activity {
    params: ActivityParams,
    components: AllocatedComponents,
    obs_history: Option<Arc<ObsHistory>>,

    units: Arc<UnitList>,
    state: ActivityState,
    stage: Stage,
    stop_received: bool,
    validity_tainted: bool,

    events_tx: mpsc::UnboundedSender<ActivityEvent>,
    events_rx: mpsc::UnboundedReceiver<ActivityEvent>,
    watchdog: Watchdog,

    /// Per-kind started/ready bookkeeping for the non-detector hardware.
    non_detector_started: HashMap<ComponentKind, usize>,
    non_detector_ready: HashMap<ComponentKind, usize>,

    start_time: Option<DateTime<Utc>>,
    start_of_data_collection: Option<DateTime<Utc>>,
    candidates: Vec<(String, Bytes)>,
    candidate_freqs_mhz: Vec<f64>,
    failure_reason: Option<String>,
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.params.id)
            .field("type", &self.params.activity_type)
            .field("state", &self.state)
            .field("stage", &self.stage)
            .finish()
    }
}

impl Activity {
    /// Build an activity and its control handle. Parameter validation
    /// failures surface to the caller; nothing is attached yet.
    pub fn new(
        params: ActivityParams,
        components: AllocatedComponents,
        obs_history: Option<Arc<ObsHistory>>,
    ) -> AppResult<(Self, ActivityHandle)> {
        params.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ActivityHandle {
            activity_id: params.id,
            events: events_tx.clone(),
        };
        let seed_candidates = params.seed_candidates.clone();
        let activity = Self {
            params,
            components,
            obs_history,
            units: Arc::new(UnitList::new()),
            state: ActivityState::Pending,
            stage: Stage::Prepare,
            stop_received: false,
            validity_tainted: false,
            events_tx,
            events_rx,
            watchdog: Watchdog::new(),
            non_detector_started: HashMap::new(),
            non_detector_ready: HashMap::new(),
            start_time: None,
            start_of_data_collection: None,
            candidates: seed_candidates,
            candidate_freqs_mhz: Vec::new(),
            failure_reason: None,
        };
        Ok((activity, handle))
    }

    pub fn id(&self) -> ActivityId {
        self.params.id
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn units(&self) -> Arc<UnitList> {
        Arc::clone(&self.units)
    }

    /// Drive the activity to completion. The returned outcome is the
    /// exactly-once completion notification.
    pub async fn run(mut self, handle: ActivityHandle) -> ActivityOutcome {
        self.components.attach_all(&handle);

        let result = self.run_stages().await;
        if let Err(err) = &result {
            error!(activity = %self.params.id, %err, "activity failed");
            self.state = ActivityState::Failed;
            if self.failure_reason.is_none() {
                self.failure_reason = Some(err.to_string());
            }
        }

        self.teardown().await;

        info!(
            activity = %self.params.id,
            state = ?self.state,
            "activity finished"
        );
        let unit_coverage = if self.state == ActivityState::Done {
            self.units
                .snapshot()
                .into_iter()
                .filter(|unit| unit.valid_observation)
                .filter_map(|unit| {
                    Some((unit.target, unit.low_freq_mhz()?, unit.high_freq_mhz()?))
                })
                .collect()
        } else {
            Vec::new()
        };
        ActivityOutcome {
            id: self.params.id,
            state: self.state,
            failure_reason: self.failure_reason.clone(),
            counters: self.units.counters(),
            start_of_data_collection: self.start_of_data_collection,
            candidates: std::mem::take(&mut self.candidates),
            candidate_freqs_mhz: std::mem::take(&mut self.candidate_freqs_mhz),
            unit_coverage,
        }
    }

    async fn run_stages(&mut self) -> AppResult<()> {
        self.state = ActivityState::Starting;
        self.prepare().await?;
        if self.stop_received {
            return Ok(());
        }

        self.state = ActivityState::WaitingReady;
        self.start_components().await?;
        if self.stop_received {
            return Ok(());
        }

        self.tune_detectors().await?;
        if self.stop_received {
            return Ok(());
        }

        self.state = ActivityState::Collecting;
        self.collect().await?;
        if self.stop_received {
            return Ok(());
        }

        self.state = ActivityState::Detecting;
        self.detect().await?;
        if self.stop_received {
            return Ok(());
        }

        self.state = ActivityState::Reporting;
        self.report().await?;
        if !self.stop_received && self.state == ActivityState::Reporting {
            self.state = ActivityState::Done;
        }
        Ok(())
    }

    fn fail(&mut self, stage: Stage, detail: impl Into<String>) -> ServerError {
        let reason = format!("{}: {}", stage.timeout_reason(), detail.into());
        self.failure_reason = Some(reason.clone());
        ServerError::ActivityFailed {
            activity_id: self.params.id,
            stage: stage.timeout_reason(),
            reason,
        }
    }

    // ---- Prepare ---------------------------------------------------------

    async fn prepare(&mut self) -> AppResult<()> {
        self.stage = Stage::Prepare;
        let start_time =
            Utc::now() + chrono::Duration::seconds(i64::from(self.params.start_time_offset_secs));
        self.start_time = Some(start_time);

        let data_products_dir = self.params.data_products_dir.clone();
        if let Err(err) = tokio::fs::create_dir_all(&data_products_dir).await {
            return Err(self.fail(Stage::Prepare, format!("data products dir: {err}")));
        }

        if self.params.ops.contains(ActivityOps::USE_DETECTOR)
            && self.components.detectors.is_empty()
        {
            return Err(self.fail(Stage::Prepare, "no detectors allocated"));
        }

        self.assign_detector_frequencies().await?;

        info!(
            activity = %self.params.id,
            activity_type = %self.params.activity_type,
            start_time = %start_time,
            units = self.units.len(),
            "activity prepared"
        );
        Ok(())
    }

    /// Run the tuner over the allocated detectors and materialize one
    /// activity unit per assigned detector.
    async fn assign_detector_frequencies(&mut self) -> AppResult<()> {
        let mut slots: Vec<DetectorSlot> = self
            .components
            .detectors
            .iter()
            .map(|proxy| DetectorSlot::new(proxy.name(), self.params.mhz_per_channel))
            .collect();

        if self.params.ops.contains(ActivityOps::FOLLOW_UP) {
            let previous = self.previous_assignments().await?;
            apply_previous_assignments(&mut slots, &previous);
        } else {
            let chosen = self.params.chosen_obs_range.clone();
            let mut tuner = match ObsRangeTuner::new(chosen) {
                Ok(tuner) => tuner,
                Err(err) => return Err(self.fail(Stage::Prepare, err.to_string())),
            };
            tuner.tune_channelized(
                &mut slots,
                self.params.total_channels,
                self.params.mhz_per_channel,
            );
        }

        let mut assigned = 0usize;
        for slot in &slots {
            let Some(assignment) = slot.assignment else {
                debug!(detector = %slot.name, "detector not in use this activity");
                continue;
            };
            let beam = self
                .params
                .detector_beams
                .get(&slot.name)
                .copied()
                .unwrap_or(BeamNumber(1));
            // Detectors on a beam with no pointing this activity sit out.
            let Some(beam_target) = self
                .params
                .beam_targets
                .iter()
                .find(|bt| bt.beam == beam)
            else {
                debug!(
                    detector = %slot.name,
                    %beam,
                    "no target on beam; detector sits out"
                );
                continue;
            };

            let detector_number = slot
                .name
                .trim_start_matches(|c: char| !c.is_ascii_digit())
                .parse::<i32>()
                .unwrap_or(-1);

            let mut unit = ActivityUnit::new(
                slot.name.clone(),
                DetectorNumber(detector_number),
                beam,
                beam_target.target,
                beam_target.primary_target,
                slot.bandwidth_mhz,
            );
            unit.tuning = Some(assignment);
            self.units.insert(unit);
            assigned += 1;
        }

        if self.params.ops.contains(ActivityOps::USE_DETECTOR) && assigned == 0 {
            return Err(self.fail(Stage::Prepare, "no detector could be tuned"));
        }
        Ok(())
    }

    async fn previous_assignments(
        &self,
    ) -> AppResult<HashMap<String, DetectorAssignment>> {
        match (self.params.previous_activity, &self.obs_history) {
            (Some(previous_id), Some(history)) => {
                Ok(history.previous_assignments(previous_id).await?)
            }
            _ => Ok(HashMap::new()),
        }
    }

    // ---- StartComponents -------------------------------------------------

    async fn start_components(&mut self) -> AppResult<()> {
        self.stage = Stage::StartComponents;

        if self.params.ops.contains(ActivityOps::USE_TSCOPE) {
            self.start_telescopes().await;
        }
        if self.params.ops.contains(ActivityOps::USE_IFC) {
            self.start_if_chains().await;
        }
        if self.params.ops.contains(ActivityOps::USE_TESTGEN) {
            self.start_test_signals().await;
        }

        self.watchdog.arm(
            Stage::StartComponents,
            self.params.timeouts.component_ready,
            self.events_tx.clone(),
        );
        let flow = self
            .wait_until(Stage::StartComponents, Self::all_components_ready)
            .await;
        self.watchdog.cancel();
        match flow {
            StageFlow::Done => Ok(()),
            StageFlow::StopRequested => Ok(()),
            StageFlow::TimedOut => {
                Err(self.fail(Stage::StartComponents, "not all components reported ready"))
            }
        }
    }

    fn all_components_ready(&self) -> bool {
        self.non_detector_started.iter().all(|(kind, started)| {
            self.non_detector_ready.get(kind).copied().unwrap_or(0) >= *started
        })
    }

    async fn start_telescopes(&mut self) {
        let beams = self.params.beam_targets.clone();
        let activity_id = self.params.id;
        for proxy in &self.components.telescopes {
            self.non_detector_started
                .entry(ComponentKind::Telescope)
                .and_modify(|n| *n += 1)
                .or_insert(1);

            let mut commands = vec![TelescopeCommand::Allocate {
                subarray: "antgroup".to_string(),
            }];
            commands.push(TelescopeCommand::BeamformerReset);
            commands.push(TelescopeCommand::BeamformerInit);
            commands.push(TelescopeCommand::BeamformerAutoatten);
            for bt in &beams {
                commands.push(TelescopeCommand::BeamformerSetCoords {
                    beam: format!("beam{}", bt.beam),
                    ra2000_hours: bt.ra2000_hours,
                    dec2000_deg: bt.dec2000_deg,
                });
            }
            if let Some(low) = self.params.chosen_obs_range.min_value() {
                commands.push(TelescopeCommand::Tune {
                    tuning_name: "tuningb".to_string(),
                    sky_freq_mhz: low,
                });
                commands.push(TelescopeCommand::Zfocus { sky_freq_mhz: low });
            }
            commands.push(TelescopeCommand::BeamformerPoint);

            for command in &commands {
                if let Err(err) = proxy.command(activity_id, command).await {
                    warn!(
                        activity = %activity_id,
                        component = %proxy.name(),
                        %err,
                        "telescope command failed"
                    );
                }
            }
        }
    }

    async fn start_if_chains(&mut self) {
        let activity_id = self.params.id;
        let source = if self.params.ops.contains(ActivityOps::USE_TESTGEN) {
            "test"
        } else {
            "sky"
        };
        for proxy in &self.components.if_chains {
            self.non_detector_started
                .entry(ComponentKind::IfChain)
                .and_modify(|n| *n += 1)
                .or_insert(1);
            let commands = [
                IfChainCommand::IfSource {
                    source: source.to_string(),
                },
                IfChainCommand::Attn {
                    left_db: 0,
                    right_db: 0,
                },
            ];
            for command in &commands {
                if let Err(err) = proxy.command(activity_id, command).await {
                    warn!(
                        activity = %activity_id,
                        component = %proxy.name(),
                        %err,
                        "if chain command failed"
                    );
                }
            }
        }
    }

    async fn start_test_signals(&mut self) {
        let activity_id = self.params.id;
        let tone_freq = self
            .params
            .chosen_obs_range
            .min_value()
            .unwrap_or(1420.0);
        for proxy in &self.components.test_signals {
            self.non_detector_started
                .entry(ComponentKind::TestSignal)
                .and_modify(|n| *n += 1)
                .or_insert(1);
            let command = if self.params.ops.contains(ActivityOps::RF_TONE) {
                TestSignalCommand::TuneSigGen {
                    freq_mhz: tone_freq,
                    amp_dbm: -90.0,
                    drift_rate_hz_sec: 0.1,
                    duration_secs: f64::from(self.params.data_collection_length_secs),
                }
            } else {
                TestSignalCommand::Quiet
            };
            if let Err(err) = proxy.command(activity_id, &command).await {
                warn!(
                    activity = %activity_id,
                    component = %proxy.name(),
                    %err,
                    "test signal command failed"
                );
            }
        }
    }

    // ---- TuneDetectors ---------------------------------------------------

    async fn tune_detectors(&mut self) -> AppResult<()> {
        self.stage = Stage::TuneDetectors;
        let activity_id = self.params.id;

        // Send the recent-RFI mask ahead of the tune orders.
        if self.params.ops.contains(ActivityOps::CREATE_RECENT_RFI_MASK)
            && !self.params.recent_signals_mhz.is_empty()
        {
            match RecentRfiMask::create_mask(
                &self.params.recent_signals_mhz,
                self.params.min_rfi_mask_element_width_mhz,
            ) {
                Ok(mask) => self.send_rfi_mask(&mask).await,
                Err(err) => {
                    warn!(activity = %activity_id, %err, "recent RFI mask build failed");
                }
            }
        }

        for unit in self.units.snapshot() {
            let Some(tuning) = unit.tuning else { continue };
            let Some(proxy) = self
                .components
                .detectors
                .iter()
                .find(|p| p.name() == unit.detector_name)
            else {
                continue;
            };
            let order = DetectorTuneOrder {
                detector: unit.detector_number,
                beam: unit.beam,
                channel: tuning.channel,
                sky_freq_mhz: tuning.center_freq_mhz,
                bandwidth_mhz: unit.bandwidth_mhz,
            };
            if let Err(err) = proxy.tune(activity_id, &order).await {
                warn!(
                    activity = %activity_id,
                    component = %unit.detector_name,
                    %err,
                    "tune order failed; unit lost"
                );
                self.units.mark_failed(&unit.detector_name);
            }
        }

        self.watchdog.arm(
            Stage::TuneDetectors,
            self.params.timeouts.detector_tuned,
            self.events_tx.clone(),
        );
        let flow = self
            .wait_until(Stage::TuneDetectors, |activity| {
                let counters = activity.units.counters();
                counters.tuned + counters.failed >= counters.started
            })
            .await;
        self.watchdog.cancel();
        self.units.assert_accounting_identity();

        match flow {
            StageFlow::Done | StageFlow::StopRequested => Ok(()),
            StageFlow::TimedOut => {
                Err(self.fail(Stage::TuneDetectors, "tune acknowledgments missing"))
            }
        }
    }

    async fn send_rfi_mask(&self, mask: &[FrequencyBand]) {
        for proxy in &self.components.detectors {
            if let Err(err) = proxy.send_recent_rfi_mask(self.params.id, mask).await {
                warn!(
                    activity = %self.params.id,
                    component = %proxy.name(),
                    %err,
                    "rfi mask send failed"
                );
            }
        }
    }

    // ---- Collect ---------------------------------------------------------

    async fn collect(&mut self) -> AppResult<()> {
        self.stage = Stage::Collect;
        let activity_id = self.params.id;
        let start_time = self.start_time.unwrap_or_else(Utc::now);
        let wire_start = WireTimestamp::new(start_time.timestamp().max(0) as u32, 0);

        for proxy in &self.components.channelizers {
            if let Err(err) = proxy
                .start(
                    activity_id,
                    wire_start.secs,
                    self.params.chosen_obs_range.min_value().unwrap_or(0.0),
                )
                .await
            {
                warn!(
                    activity = %activity_id,
                    component = %proxy.name(),
                    %err,
                    "channelizer start failed"
                );
            }
        }

        for unit in self.units.snapshot() {
            if unit.state == UnitState::Failed {
                continue;
            }
            if let Some(proxy) = self
                .components
                .detectors
                .iter()
                .find(|p| p.name() == unit.detector_name)
            {
                if let Err(err) = proxy.send_start_time(activity_id, wire_start).await {
                    warn!(
                        activity = %activity_id,
                        component = %unit.detector_name,
                        %err,
                        "start time send failed; unit lost"
                    );
                    self.units.mark_failed(&unit.detector_name);
                }
            }
        }

        let collection = Duration::from_secs(u64::from(self.params.data_collection_length_secs))
            + self.params.timeouts.data_collection_margin
            + Duration::from_secs(u64::from(self.params.start_time_offset_secs));
        self.watchdog
            .arm(Stage::Collect, collection, self.events_tx.clone());
        let flow = self
            .wait_until(Stage::Collect, |activity| {
                let counters = activity.units.counters();
                counters.data_collection_complete + counters.failed >= counters.started
            })
            .await;
        self.watchdog.cancel();
        self.units.assert_accounting_identity();

        match flow {
            StageFlow::Done | StageFlow::StopRequested => Ok(()),
            StageFlow::TimedOut => Err(self.fail(Stage::Collect, "data collection incomplete")),
        }
    }

    // ---- Detect ----------------------------------------------------------

    async fn detect(&mut self) -> AppResult<()> {
        self.stage = Stage::Detect;

        self.watchdog.arm(
            Stage::Detect,
            self.params.timeouts.signal_detection,
            self.events_tx.clone(),
        );
        let flow = self
            .wait_until(Stage::Detect, |activity| {
                let counters = activity.units.counters();
                counters.done_sending_candidates + counters.failed >= counters.started
            })
            .await;
        self.watchdog.cancel();
        self.units.assert_accounting_identity();

        match flow {
            StageFlow::StopRequested => return Ok(()),
            StageFlow::TimedOut => {
                return Err(self.fail(Stage::Detect, "candidate results incomplete"))
            }
            StageFlow::Done => {}
        }

        if self.units.surviving() == 0 {
            return Err(self.fail(Stage::Detect, "no surviving activity units"));
        }
        Ok(())
    }

    // ---- Report ----------------------------------------------------------

    async fn report(&mut self) -> AppResult<()> {
        self.stage = Stage::Report;
        let activity_id = self.params.id;

        // Followups collate candidates across beams: forward everything
        // collected to the surviving detectors for secondary resolution.
        if self.params.ops.contains(ActivityOps::FOLLOW_UP) && !self.candidates.is_empty() {
            for proxy in &self.components.detectors {
                for (from, body) in &self.candidates {
                    if proxy.name() == *from {
                        continue;
                    }
                    if let Err(err) = proxy
                        .forward_followup_candidates(activity_id, body.clone())
                        .await
                    {
                        warn!(
                            activity = %activity_id,
                            component = %proxy.name(),
                            %err,
                            "candidate forward failed"
                        );
                    }
                }
                if let Err(err) = proxy.resolve_candidates(activity_id, Bytes::new()).await {
                    warn!(
                        activity = %activity_id,
                        component = %proxy.name(),
                        %err,
                        "resolve request failed"
                    );
                }
            }
        }

        // Persist ObsHistory before waiting out the unit completions; a
        // database failure must still tear the hardware down, which the
        // caller's teardown path guarantees.
        if let Some(history) = self.obs_history.clone() {
            let data_coll_start = self.start_of_data_collection.unwrap_or_else(Utc::now);
            let valid = !self.validity_tainted;
            let units = self.units.snapshot();
            let result = history
                .record_activity_results(
                    activity_id,
                    &self.params.activity_type,
                    valid,
                    data_coll_start,
                    &units,
                )
                .await;
            if let Err(err) = result {
                return Err(self.fail(Stage::Report, format!("database: {err}")));
            }
        }

        self.watchdog.arm(
            Stage::Report,
            self.params.timeouts.act_unit_complete,
            self.events_tx.clone(),
        );
        let flow = self
            .wait_until(Stage::Report, |activity| {
                let counters = activity.units.counters();
                counters.done + counters.failed >= counters.started
            })
            .await;
        self.watchdog.cancel();
        self.units.assert_accounting_identity();

        match flow {
            StageFlow::Done | StageFlow::StopRequested => Ok(()),
            StageFlow::TimedOut => Err(self.fail(Stage::Report, "unit completions missing")),
        }
    }

    // ---- Teardown --------------------------------------------------------

    /// Always runs, regardless of how the stages ended. Errors here are
    /// logged and swallowed.
    async fn teardown(&mut self) {
        self.stage = Stage::Teardown;
        self.watchdog.cancel();

        if self.stop_received {
            self.send_stop_to_components().await;
        }

        for proxy in &self.components.test_signals {
            if let Err(err) = proxy.quiet(self.params.id).await {
                debug!(%err, "testsig quiet failed during teardown");
            }
        }
        for proxy in &self.components.channelizers {
            if let Err(err) = proxy.stop(self.params.id).await {
                debug!(%err, "channelizer stop failed during teardown");
            }
        }

        self.components.detach_all();
    }

    async fn send_stop_to_components(&self) {
        let activity_id = self.params.id;
        for proxy in &self.components.detectors {
            if let Err(err) = proxy.stop(activity_id).await {
                debug!(%err, "detector stop failed");
            }
        }
        for proxy in &self.components.telescopes {
            if let Err(err) = proxy.command(activity_id, &TelescopeCommand::Stop).await {
                debug!(%err, "telescope stop failed");
            }
        }
    }

    // ---- Event handling --------------------------------------------------

    /// Suspend until the predicate holds, the stage times out, or stop is
    /// requested. Unit counters update for every event that arrives,
    /// whatever the current stage, so early reporters are never lost.
    async fn wait_until(
        &mut self,
        stage: Stage,
        predicate: fn(&Activity) -> bool,
    ) -> StageFlow {
        loop {
            if predicate(self) {
                return StageFlow::Done;
            }
            let Some(event) = self.events_rx.recv().await else {
                // Queue closed: treat as a stop.
                self.stop_received = true;
                return StageFlow::StopRequested;
            };
            match self.apply_event(event) {
                Applied::Stop => return StageFlow::StopRequested,
                Applied::Timeout(timed_out_stage) if timed_out_stage == stage => {
                    return StageFlow::TimedOut;
                }
                _ => {}
            }
        }
    }

    fn apply_event(&mut self, event: ActivityEvent) -> Applied {
        match event {
            ActivityEvent::Stop => {
                if !self.stop_received {
                    info!(activity = %self.params.id, "stop received");
                    self.stop_received = true;
                    self.state = ActivityState::Stopped;
                    return Applied::Stop;
                }
                Applied::Ignored
            }
            ActivityEvent::StageTimeout(stage) => Applied::Timeout(stage),
            ActivityEvent::ComponentReady { kind, name } => {
                if kind == ComponentKind::Detector {
                    self.units.mark_ready(&name);
                } else {
                    *self.non_detector_ready.entry(kind).or_insert(0) += 1;
                }
                Applied::Progress
            }
            ActivityEvent::DetectorTuned { name } => {
                // A tuned detector is implicitly ready too.
                self.units.mark_ready(&name);
                self.units.mark_tuned(&name);
                Applied::Progress
            }
            ActivityEvent::DataCollectionStarted { name } => {
                if self.start_of_data_collection.is_none() {
                    self.start_of_data_collection = Some(Utc::now());
                }
                self.units.mark_data_collection_started(&name);
                Applied::Progress
            }
            ActivityEvent::DataCollectionComplete { name } => {
                self.units.mark_data_collection_complete(&name);
                Applied::Progress
            }
            ActivityEvent::SignalDetectionStarted { name } => {
                self.units.mark_signal_detection_started(&name);
                Applied::Progress
            }
            ActivityEvent::SignalDetectionComplete { name } => {
                self.units.mark_signal_detection_complete(&name);
                Applied::Progress
            }
            ActivityEvent::CandidateResults { name, body } => {
                self.candidate_freqs_mhz
                    .extend(candidate_signal_freqs(&name, &body));
                self.candidates.push((name, body));
                Applied::Progress
            }
            ActivityEvent::DoneSendingCandidateResults { name } => {
                self.units.mark_done_sending_candidates(&name);
                Applied::Progress
            }
            ActivityEvent::ActivityUnitComplete { name } => {
                self.units.mark_complete(&name);
                Applied::Progress
            }
            ActivityEvent::ComponentDisconnected { kind, name } => {
                warn!(
                    activity = %self.params.id,
                    component = %name,
                    ?kind,
                    "component disconnected mid-activity"
                );
                if kind == ComponentKind::Detector {
                    // The unit is lost; the activity continues with the
                    // rest but its observation validity is tainted.
                    if self.units.mark_failed(&name) {
                        self.validity_tainted = true;
                    }
                } else {
                    self.validity_tainted = true;
                }
                Applied::Progress
            }
            ActivityEvent::ComponentMessage { kind, name, error } => {
                // Forwarded component errors do not fail the activity by
                // themselves; the stage deadline decides.
                warn!(
                    activity = %self.params.id,
                    component = %name,
                    ?kind,
                    severity = ?error.severity,
                    "{}",
                    error.text
                );
                Applied::Progress
            }
        }
    }
}

enum Applied {
    Progress,
    Ignored,
    Stop,
    Timeout(Stage),
}

/// Signal frequencies inside one candidate-results body. A body that does
/// not parse still gets forwarded raw for secondary processing; it just
/// contributes nothing to the recent-RFI mask.
fn candidate_signal_freqs(detector: &str, body: &Bytes) -> Vec<f64> {
    match CandidateReport::unpack(body.clone()) {
        Ok(report) => report.signals.iter().map(|s| s.freq_mhz).collect(),
        Err(err) => {
            debug!(%detector, %err, "unparseable candidate body");
            Vec::new()
        }
    }
}

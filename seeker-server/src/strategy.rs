//! Selection and sequencing of activities.
//!
//! The strategy runs one activity at a time (only one observation collects
//! data at any moment): it ages the scheduler's fairness window on its
//! rotation cadence, picks the next activity kind (followup when candidate
//! signals are queued, a fresh target observation otherwise), assembles the
//! activity's parameters from a scheduler choice, allocates hardware, and
//! replays the observed coverage after each run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use seeker_config::SeekerConfig;
use seeker_core::astro;
use seeker_core::target::DecPreference;
use seeker_core::{ObsRange, SchedulerSetup, TargetChoice, TargetMerit, TargetScheduler};
use seeker_model::{ActivityId, BeamNumber, TargetId};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::activity::{
    Activity, ActivityOps, ActivityOutcome, ActivityParams, ActivityState,
    AllocatedComponents, BeamTarget, StageTimeouts,
};
use crate::errors::{AppResult, ServerError};
use crate::site::Site;

/// A queued followup observation chasing candidates from an earlier run.
#[derive(Debug, Clone)]
struct FollowupRequest {
    previous_activity: ActivityId,
    choice: TargetChoice,
    candidates: Vec<(String, Bytes)>,
}

/// Drives the observation sequence.
pub struct ActivityStrategy {
    site: Arc<Site>,
    config: SeekerConfig,
    scheduler: TargetScheduler,
    followups: VecDeque<FollowupRequest>,
    next_rotation: DateTime<Utc>,
    /// Activity ids when the database is off.
    local_activity_counter: i64,
    beam_numbers: HashMap<String, BeamNumber>,
    /// Handle of the activity currently running, for the operator surface.
    current_activity: Arc<parking_lot::Mutex<Option<crate::activity::ActivityHandle>>>,
    /// Signal frequencies seen in recent activities, kept sorted; the next
    /// activity masks them out of the detectors' attention.
    recent_signals_mhz: Vec<f64>,
}

impl std::fmt::Debug for ActivityStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityStrategy")
            .field("targets", &self.scheduler.target_count())
            .field("queued_followups", &self.followups.len())
            .finish()
    }
}

impl ActivityStrategy {
    pub fn new(site: Arc<Site>, config: SeekerConfig) -> AppResult<Self> {
        let scheduler = TargetScheduler::new(scheduler_setup(&config)?);

        // Beams get stable one-based numbers in name order.
        let mut beam_numbers = HashMap::new();
        for (index, name) in site
            .topology
            .component_names(seeker_core::topology::NodeKind::Beam)
            .iter()
            .enumerate()
        {
            beam_numbers.insert((*name).to_string(), BeamNumber(index as i32 + 1));
        }

        let rotation_interval =
            chrono::Duration::seconds(config.scheduler.primary_id_rotation_interval_secs as i64);
        Ok(Self {
            site,
            config,
            scheduler,
            followups: VecDeque::new(),
            next_rotation: Utc::now() + rotation_interval,
            local_activity_counter: 0,
            beam_numbers,
            current_activity: Arc::new(parking_lot::Mutex::new(None)),
            recent_signals_mhz: Vec::new(),
        })
    }

    /// Record signal frequencies reported by detectors so the next
    /// activity's recent-RFI mask covers them.
    pub fn note_recent_signals(&mut self, mut freqs_mhz: Vec<f64>) {
        self.recent_signals_mhz.append(&mut freqs_mhz);
        self.recent_signals_mhz
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.recent_signals_mhz.dedup();
    }

    /// Channel count from the first connected channelizer's intrinsics,
    /// falling back to the configured default.
    fn total_channels(&self) -> i32 {
        let default_channels = self.config.scheduler.total_channels;
        self.site
            .channelizers
            .proxy_list()
            .first()
            .map(|chan| chan.total_channels(default_channels))
            .unwrap_or(default_channels)
    }

    /// Shared slot the operator surface reads to stop a running activity.
    pub fn current_activity_slot(
        &self,
    ) -> Arc<parking_lot::Mutex<Option<crate::activity::ActivityHandle>>> {
        Arc::clone(&self.current_activity)
    }

    pub fn scheduler_mut(&mut self) -> &mut TargetScheduler {
        &mut self.scheduler
    }

    pub fn queued_followups(&self) -> usize {
        self.followups.len()
    }

    async fn next_activity_id(&mut self) -> AppResult<ActivityId> {
        match &self.site.obs_history {
            Some(history) => history.next_activity_id().await,
            None => {
                self.local_activity_counter += 1;
                Ok(ActivityId(self.local_activity_counter))
            }
        }
    }

    /// Rotation happens between activities, never mid-selection.
    fn rotate_if_due(&mut self, now: DateTime<Utc>) {
        if now >= self.next_rotation {
            self.scheduler.rotate_primary_target_ids();
            let interval = chrono::Duration::seconds(
                self.config.scheduler.primary_id_rotation_interval_secs as i64,
            );
            self.next_rotation = now + interval;
            info!("rotated primary target fairness window");
        }
    }

    fn beam_targets_for_choice(&self, choice: &TargetChoice) -> AppResult<Vec<BeamTarget>> {
        let mut beam_targets = Vec::new();
        let all_targets: Vec<(TargetId, TargetId)> = std::iter::once(choice.primary_target)
            .chain(choice.additional_targets.iter().copied())
            .map(|id| (id, choice.primary_group))
            .collect();

        for (index, (target_id, primary)) in all_targets.iter().enumerate() {
            let target = self.scheduler.target(*target_id).ok_or_else(|| {
                ServerError::InvalidParameters(format!("chosen target {target_id} unknown"))
            })?;
            beam_targets.push(BeamTarget {
                beam: BeamNumber(index as i32 + 1),
                target: *target_id,
                primary_target: *primary,
                ra2000_hours: astro::rad_to_hours(target.ra2000_rads),
                dec2000_deg: astro::rad_to_deg(target.dec2000_rads),
            });
        }
        Ok(beam_targets)
    }

    fn detector_beam_map(&self) -> HashMap<String, BeamNumber> {
        let mut map = HashMap::new();
        for (beam_name, number) in &self.beam_numbers {
            for detector in self.site.topology.children_of(beam_name) {
                map.insert(detector.to_string(), *number);
            }
        }
        map
    }

    fn allocate_components(&self) -> AllocatedComponents {
        AllocatedComponents {
            telescopes: self.site.telescopes.allocate_proxy_list(),
            if_chains: self.site.if_chains.allocate_proxy_list(),
            test_signals: self.site.test_signals.allocate_proxy_list(),
            detectors: self.site.detectors.allocate_proxy_list(),
            channelizers: self.site.channelizers.allocate_proxy_list(),
        }
    }

    fn release_components(&self, components: &AllocatedComponents) {
        self.site
            .telescopes
            .release_proxy_list(&components.telescopes);
        self.site.if_chains.release_proxy_list(&components.if_chains);
        self.site
            .test_signals
            .release_proxy_list(&components.test_signals);
        self.site.detectors.release_proxy_list(&components.detectors);
        self.site
            .channelizers
            .release_proxy_list(&components.channelizers);
    }

    fn build_params(
        &self,
        id: ActivityId,
        ops: ActivityOps,
        activity_type: &str,
        choice: &TargetChoice,
        previous_activity: Option<ActivityId>,
        seed_candidates: Vec<(String, Bytes)>,
    ) -> AppResult<ActivityParams> {
        let activity = &self.config.activity;
        Ok(ActivityParams {
            id,
            activity_type: activity_type.to_string(),
            ops,
            beam_targets: self.beam_targets_for_choice(choice)?,
            detector_beams: self.detector_beam_map(),
            chosen_obs_range: choice.chosen_obs_range.clone(),
            start_time_offset_secs: activity.start_time_offset_secs,
            data_collection_length_secs: activity.data_collection_length_secs,
            total_channels: self.total_channels(),
            mhz_per_channel: self.config.scheduler.smallest_detector_bandwidth_mhz,
            timeouts: StageTimeouts {
                component_ready: std::time::Duration::from_secs(
                    activity.component_ready_timeout_secs,
                ),
                detector_tuned: std::time::Duration::from_secs(
                    activity.detector_tuned_timeout_secs,
                ),
                data_collection_margin: std::time::Duration::from_secs(
                    activity.data_collection_timeout_margin_secs,
                ),
                signal_detection: std::time::Duration::from_secs(
                    activity.signal_detection_timeout_secs,
                ),
                act_unit_complete: std::time::Duration::from_secs(
                    activity.act_unit_complete_timeout_secs,
                ),
            },
            recent_signals_mhz: self.recent_signals_mhz.clone(),
            min_rfi_mask_element_width_mhz: activity.min_rfi_mask_element_width_mhz,
            previous_activity,
            seed_candidates,
            data_products_dir: std::path::PathBuf::from(&activity.data_products_dir)
                .join(format!("act{id}")),
        })
    }

    /// Select, run, and account for one activity.
    pub async fn run_once(&mut self) -> AppResult<ActivityOutcome> {
        let now = Utc::now();
        self.rotate_if_due(now);

        let id = self.next_activity_id().await?;
        let followup = if self.config.activity.followup_enabled {
            self.followups.pop_front()
        } else {
            None
        };

        let n_beams = self.beam_numbers.len().max(1);
        let (params, choice) = match followup {
            Some(request) => {
                let params = self.build_params(
                    id,
                    ActivityOps::followup_observation(),
                    "followup",
                    &request.choice,
                    Some(request.previous_activity),
                    request.candidates.clone(),
                )?;
                self.scheduler.mark_in_use(request.choice.primary_target, true);
                (params, request.choice)
            }
            None => {
                let choice = self.scheduler.choose_targets(
                    n_beams,
                    now,
                    self.config.scheduler.min_target_separation_beamsizes,
                    false,
                )?;
                info!(
                    activity = %id,
                    primary = %choice.primary_target,
                    range = %choice.chosen_obs_range,
                    secondaries = choice.additional_targets.len(),
                    "targets chosen"
                );
                let params = self.build_params(
                    id,
                    ActivityOps::target_observation(),
                    "target",
                    &choice,
                    None,
                    Vec::new(),
                )?;
                (params, choice)
            }
        };

        let components = self.allocate_components();
        let (activity, handle) = match Activity::new(
            params,
            components,
            self.site.obs_history.clone(),
        ) {
            Ok(built) => built,
            Err(err) => {
                self.scheduler.release_targets(&choice);
                return Err(err);
            }
        };

        *self.current_activity.lock() = Some(handle.clone());
        let outcome = activity.run(handle).await;
        *self.current_activity.lock() = None;

        // Hardware back to the pool, targets back to the sky.
        // (The activity owns nothing in the fabric once detached.)
        self.release_all(&outcome);
        self.scheduler.release_targets(&choice);

        match outcome.state {
            ActivityState::Done => {
                self.absorb_coverage(&outcome).await;
                // What the detectors just found becomes RFI to mask on the
                // next observation.
                if !outcome.candidate_freqs_mhz.is_empty() {
                    self.note_recent_signals(outcome.candidate_freqs_mhz.clone());
                }
                if self.config.activity.followup_enabled && !outcome.candidates.is_empty() {
                    info!(
                        activity = %outcome.id,
                        candidates = outcome.candidates.len(),
                        "queueing followup observation"
                    );
                    self.followups.push_back(FollowupRequest {
                        previous_activity: outcome.id,
                        choice,
                        candidates: outcome.candidates.clone(),
                    });
                }
            }
            ActivityState::Failed => {
                warn!(
                    activity = %outcome.id,
                    reason = outcome.failure_reason.as_deref().unwrap_or("unknown"),
                    "activity failed"
                );
            }
            _ => {}
        }

        Ok(outcome)
    }

    fn release_all(&self, _outcome: &ActivityOutcome) {
        // Allocation marks live in the managers; a fresh allocate returns
        // whatever is free, so releasing everything allocated is done by
        // re-deriving the full lists.
        let components = AllocatedComponents {
            telescopes: self.site.telescopes.proxy_list(),
            if_chains: self.site.if_chains.proxy_list(),
            test_signals: self.site.test_signals.proxy_list(),
            detectors: self.site.detectors.proxy_list(),
            channelizers: self.site.channelizers.proxy_list(),
        };
        self.release_components(&components);
    }

    /// Fold the activity's observed coverage back into the scheduler,
    /// preferring the database record when available.
    async fn absorb_coverage(&mut self, outcome: &ActivityOutcome) {
        let rows = match &self.site.obs_history {
            Some(history) => match history.coverage_for_activity(outcome.id).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(activity = %outcome.id, %err, "coverage read failed; using in-memory record");
                    outcome.unit_coverage.clone()
                }
            },
            None => outcome.unit_coverage.clone(),
        };
        self.scheduler.update_observed_freqs(rows);
    }

    /// Run activities until stopped. Failures pause briefly rather than
    /// spinning against a persistent fault.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            let result = tokio::select! {
                outcome = self.run_once() => outcome,
                _ = stop.changed() => return,
            };
            match result {
                Ok(outcome) => {
                    info!(
                        activity = %outcome.id,
                        state = ?outcome.state,
                        "activity sequenced"
                    );
                }
                Err(ServerError::Core(seeker_core::CoreError::NoSuitableTarget)) => {
                    warn!("no suitable target; waiting before retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                }
                Err(err) => {
                    warn!(%err, "activity sequencing error");
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
            }
        }
    }
}

/// Map the config's scheduler section onto the core scheduler setup.
pub fn scheduler_setup(config: &SeekerConfig) -> AppResult<SchedulerSetup> {
    let sched = &config.scheduler;
    let merit = TargetMerit::from_names(&sched.merit_factors)?;
    Ok(SchedulerSetup {
        site_longitude_west_deg: sched.site_longitude_west_deg,
        site_latitude_north_deg: sched.site_latitude_north_deg,
        site_horizon_deg: sched.site_horizon_deg,
        allowed: ObsRange::from_interval(
            sched.allowed_low_freq_mhz,
            sched.allowed_high_freq_mhz,
        ),
        permanent_rfi: ObsRange::new(),
        min_acceptable_remaining_band_mhz: sched.min_acceptable_remaining_band_mhz,
        min_reserved_followup_obs: sched.min_reserved_followup_obs,
        obs_length_secs: sched.obs_length_secs,
        sun_avoid_angle_deg: sched.sun_avoid_angle_deg,
        moon_avoid_angle_deg: sched.moon_avoid_angle_deg,
        geosat_avoid_angle_deg: sched.geosat_avoid_angle_deg,
        zenith_avoid_angle_deg: sched.zenith_avoid_angle_deg,
        dec_lower_limit_deg: sched.dec_lower_limit_deg,
        dec_upper_limit_deg: sched.dec_upper_limit_deg,
        high_priority_catalogs: sched.high_priority_catalogs.iter().cloned().collect(),
        low_priority_catalogs: sched.low_priority_catalogs.iter().cloned().collect(),
        merit,
        dec_preference: DecPreference::FavorLower,
        max_dist_light_years: 225.0,
        primary_beamsize_at_one_ghz_arcsec: sched.primary_beamsize_at_one_ghz_arcsec,
        synth_beamsize_at_one_ghz_arcsec: sched.synth_beamsize_at_one_ghz_arcsec,
        primary_id_rotation_window: sched.primary_id_rotation_window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeker_core::ExpectedTopology;
    use seeker_core::Target;

    async fn site() -> Arc<Site> {
        let mut config = SeekerConfig::default();
        config.database.use_database = false;
        let topology = ExpectedTopology::parse(
            "seeker expected components v1.0\n\
             Site main IfChainList ifc1\n\
             IfChain ifc1 BeamList beam1 beam2\n\
             Beam beam1 DetectorList dx1\n\
             Beam beam2 DetectorList dx2\n",
        )
        .unwrap();
        Arc::new(Site::new(&config, topology).await.unwrap())
    }

    fn config() -> SeekerConfig {
        let mut config = SeekerConfig::default();
        config.database.use_database = false;
        config
    }

    #[tokio::test]
    async fn beams_get_stable_numbers_and_detector_mapping() {
        let strategy = ActivityStrategy::new(site().await, config()).unwrap();
        let map = strategy.detector_beam_map();
        assert_eq!(map.get("dx1"), Some(&BeamNumber(1)));
        assert_eq!(map.get("dx2"), Some(&BeamNumber(2)));
    }

    #[tokio::test]
    async fn recent_signals_flow_into_the_next_activity_params() {
        let mut strategy = ActivityStrategy::new(site().await, config()).unwrap();
        strategy.note_recent_signals(vec![1421.5, 1420.001, 1421.5]);
        strategy.note_recent_signals(vec![1420.7]);

        strategy.scheduler_mut().insert_target(Target::new(
            TargetId(1),
            TargetId(100),
            0.0,
            0.5,
            "habcat",
        ));
        let choice = TargetChoice {
            primary_target: TargetId(1),
            primary_group: TargetId(100),
            chosen_obs_range: ObsRange::from_interval(1410.0, 1730.0),
            additional_targets: Vec::new(),
        };
        let params = strategy
            .build_params(
                ActivityId(9),
                ActivityOps::target_observation(),
                "target",
                &choice,
                None,
                Vec::new(),
            )
            .unwrap();

        // Sorted, deduplicated, and ready for the mask builder.
        assert_eq!(params.recent_signals_mhz, vec![1420.001, 1420.7, 1421.5]);
        // No channelizer has reported intrinsics, so the configured
        // channel count applies.
        assert_eq!(params.total_channels, 256);
    }

    #[tokio::test]
    async fn run_once_without_targets_reports_no_target() {
        let mut strategy = ActivityStrategy::new(site().await, config()).unwrap();
        let err = strategy.run_once().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Core(seeker_core::CoreError::NoSuitableTarget)
        ));
    }

    #[tokio::test]
    async fn run_once_with_a_target_but_no_hardware_fails_cleanly() {
        let mut strategy = ActivityStrategy::new(site().await, config()).unwrap();

        // A far-north target is circumpolar from the site and stays clear
        // of every avoidance cone whatever the wall clock says.
        let lmst = astro::lmst_rads(Utc::now(), 121.47);
        let target = Target::new(
            TargetId(1),
            TargetId(100),
            lmst,
            astro::deg_to_rad(85.0),
            "habcat",
        );
        strategy.scheduler_mut().insert_target(target);

        let outcome = strategy.run_once().await.unwrap();
        // No detectors are connected, so the activity fails in prepare,
        // and the target is free again for the next round.
        assert_eq!(outcome.state, ActivityState::Failed);
        let target = strategy.scheduler_mut().target(TargetId(1)).unwrap();
        assert!(!target.in_use);
    }
}

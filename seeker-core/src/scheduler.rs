use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use seeker_model::TargetId;
use tracing::debug;

use crate::astro;
use crate::error::{CoreError, Result};
use crate::obs_range::ObsRange;
use crate::target::{DecPreference, MeritContext, Target, TargetMerit};

const ARCSEC_PER_RAD: f64 = 180.0 * 3600.0 / std::f64::consts::PI;

/// Static selection constraints, usually mapped from the scheduler section
/// of the config file.
#[derive(Debug)]
pub struct SchedulerSetup {
    pub site_longitude_west_deg: f64,
    pub site_latitude_north_deg: f64,
    pub site_horizon_deg: f64,

    /// Full allowed observing range before masking.
    pub allowed: ObsRange,
    /// Permanent RFI bands, excluded from every chosen range.
    pub permanent_rfi: ObsRange,
    pub min_acceptable_remaining_band_mhz: f64,

    pub min_reserved_followup_obs: u32,
    pub obs_length_secs: u32,

    pub sun_avoid_angle_deg: f64,
    pub moon_avoid_angle_deg: f64,
    pub geosat_avoid_angle_deg: f64,
    pub zenith_avoid_angle_deg: f64,
    pub dec_lower_limit_deg: f64,
    pub dec_upper_limit_deg: f64,

    pub high_priority_catalogs: HashSet<String>,
    pub low_priority_catalogs: HashSet<String>,
    pub merit: TargetMerit,
    pub dec_preference: DecPreference,
    pub max_dist_light_years: f64,

    pub primary_beamsize_at_one_ghz_arcsec: f64,
    pub synth_beamsize_at_one_ghz_arcsec: f64,
    pub primary_id_rotation_window: usize,
}

impl SchedulerSetup {
    /// Hour angle the primary must still be up for, reserving enough time
    /// for the configured number of followup observations.
    pub fn min_remaining_rads(&self) -> f64 {
        let total_activity_secs = f64::from(2 * self.obs_length_secs);
        let hours = total_activity_secs / astro::SECS_PER_HOUR
            * f64::from(self.min_reserved_followup_obs);
        astro::hours_to_rad(hours)
    }

    fn primary_beamsize_rads(&self, freq_mhz: f64) -> f64 {
        self.primary_beamsize_at_one_ghz_arcsec * 1000.0 / freq_mhz / ARCSEC_PER_RAD
    }

    fn synth_beamsize_rads(&self, freq_mhz: f64) -> f64 {
        self.synth_beamsize_at_one_ghz_arcsec * 1000.0 / freq_mhz / ARCSEC_PER_RAD
    }
}

/// Result of one selection round.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetChoice {
    pub primary_target: TargetId,
    pub primary_group: TargetId,
    pub chosen_obs_range: ObsRange,
    pub additional_targets: Vec<TargetId>,
}

/// Ranks targets by merit under visibility and availability constraints,
/// reserving an unobserved frequency range for the winner.
#[derive(Debug)]
pub struct TargetScheduler {
    setup: SchedulerSetup,
    targets: BTreeMap<TargetId, Target>,
    recently_used_primaries: VecDeque<TargetId>,
    used_since_rotation: Vec<TargetId>,
}

impl TargetScheduler {
    pub fn new(setup: SchedulerSetup) -> Self {
        Self {
            setup,
            targets: BTreeMap::new(),
            recently_used_primaries: VecDeque::new(),
            used_since_rotation: Vec::new(),
        }
    }

    pub fn insert_target(&mut self, target: Target) {
        self.targets.insert(target.id, target);
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(&id)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn setup(&self) -> &SchedulerSetup {
        &self.setup
    }

    /// Record observed coverage, typically replayed from ObsHistory rows.
    pub fn update_observed_freqs<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = (TargetId, f64, f64)>,
    {
        for (id, low_mhz, high_mhz) in rows {
            if let Some(target) = self.targets.get_mut(&id) {
                target.observed.add(low_mhz, high_mhz);
            }
        }
    }

    pub fn mark_in_use(&mut self, id: TargetId, in_use: bool) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.in_use = in_use;
        }
    }

    /// Release every target held by the given activity's choice.
    pub fn release_targets(&mut self, choice: &TargetChoice) {
        self.mark_in_use(choice.primary_target, false);
        for &id in &choice.additional_targets {
            self.mark_in_use(id, false);
        }
    }

    /// Age the fairness window: primaries chosen since the last rotation
    /// lose their bonus until they fall out of the rolling window.
    pub fn rotate_primary_target_ids(&mut self) {
        for id in self.used_since_rotation.drain(..) {
            if let Some(pos) = self.recently_used_primaries.iter().position(|&p| p == id) {
                self.recently_used_primaries.remove(pos);
            }
            self.recently_used_primaries.push_back(id);
        }
        while self.recently_used_primaries.len() > self.setup.primary_id_rotation_window {
            self.recently_used_primaries.pop_front();
        }
    }

    /// Choose a primary target plus up to `n_requested - 1` co-observable
    /// secondaries and reserve an unobserved frequency range.
    pub fn choose_targets(
        &mut self,
        n_requested: usize,
        obs_time: DateTime<Utc>,
        min_separation_beamsizes: f64,
        any_activities_running: bool,
    ) -> Result<TargetChoice> {
        let sky = SkyState::compute(&self.setup, obs_time);
        let recent: HashSet<TargetId> =
            self.recently_used_primaries.iter().copied().collect();

        let mut rejected: HashSet<TargetId> = HashSet::new();
        loop {
            let primary_id = self.best_visible_target(&sky, &recent, &rejected, any_activities_running)?;
            let primary = &self.targets[&primary_id];

            let mut remaining = primary.unobserved_within(&self.setup.allowed);
            remaining.subtract_range(&self.setup.permanent_rfi);
            remaining
                .remove_intervals_smaller_than(self.setup.min_acceptable_remaining_band_mhz);

            if remaining.is_empty() {
                // Exhausted on this target; fall back to the next best.
                debug!(target = %primary_id, "allowed band exhausted; repicking");
                rejected.insert(primary_id);
                continue;
            }

            let primary_group = primary.primary_target_id;
            let additional = self.find_secondaries(
                primary_id,
                n_requested.saturating_sub(1),
                &sky,
                &remaining,
                min_separation_beamsizes,
            );

            self.mark_in_use(primary_id, true);
            for &id in &additional {
                self.mark_in_use(id, true);
            }
            self.used_since_rotation.push(primary_group);

            return Ok(TargetChoice {
                primary_target: primary_id,
                primary_group,
                chosen_obs_range: remaining,
                additional_targets: additional,
            });
        }
    }

    fn merit_context<'a>(
        &'a self,
        sky: &'a SkyState,
        recent: &'a HashSet<TargetId>,
    ) -> MeritContext<'a> {
        MeritContext {
            lmst_rads: sky.lmst_rads,
            min_remaining_rads: self.setup.min_remaining_rads(),
            site_lat_rads: sky.site_lat_rads,
            horizon_deg: self.setup.site_horizon_deg,
            allowed: &self.setup.allowed,
            high_priority_catalogs: &self.setup.high_priority_catalogs,
            low_priority_catalogs: &self.setup.low_priority_catalogs,
            recently_used_primaries: recent,
            dec_preference: self.setup.dec_preference,
            max_dist_light_years: self.setup.max_dist_light_years,
        }
    }

    fn best_visible_target(
        &self,
        sky: &SkyState,
        recent: &HashSet<TargetId>,
        rejected: &HashSet<TargetId>,
        any_activities_running: bool,
    ) -> Result<TargetId> {
        let ctx = self.merit_context(sky, recent);

        let mut best: Option<(f64, TargetId)> = None;
        for (&id, target) in &self.targets {
            if rejected.contains(&id) {
                continue;
            }
            if !self.is_selectable(target, sky, any_activities_running) {
                continue;
            }
            let Some(merit) = self.setup.merit.overall_merit(target, &ctx) else {
                continue;
            };
            // Strictly-greater keeps the lower id on ties (ascending walk).
            match best {
                Some((best_merit, _)) if merit <= best_merit => {}
                _ => best = Some((merit, id)),
            }
        }

        best.map(|(_, id)| id).ok_or(CoreError::NoSuitableTarget)
    }

    fn is_selectable(
        &self,
        target: &Target,
        sky: &SkyState,
        any_activities_running: bool,
    ) -> bool {
        if target.in_use && any_activities_running {
            return false;
        }

        let dec_deg = astro::rad_to_deg(target.dec2000_rads);
        if dec_deg < self.setup.dec_lower_limit_deg || dec_deg > self.setup.dec_upper_limit_deg {
            return false;
        }

        let sun_sep = astro::angular_separation_rads(
            target.ra2000_rads,
            target.dec2000_rads,
            sky.sun.ra_rads,
            sky.sun.dec_rads,
        );
        if sun_sep < astro::deg_to_rad(self.setup.sun_avoid_angle_deg) {
            return false;
        }

        let moon_sep = astro::angular_separation_rads(
            target.ra2000_rads,
            target.dec2000_rads,
            sky.moon.ra_rads,
            sky.moon.dec_rads,
        );
        if moon_sep < astro::deg_to_rad(self.setup.moon_avoid_angle_deg) {
            return false;
        }

        let zenith_sep = astro::angular_separation_rads(
            target.ra2000_rads,
            target.dec2000_rads,
            sky.lmst_rads,
            sky.site_lat_rads,
        );
        if zenith_sep < astro::deg_to_rad(self.setup.zenith_avoid_angle_deg) {
            return false;
        }

        // GEO-belt exclusion annulus in declination.
        let geo_margin = (target.dec2000_rads - sky.geosat_belt_dec_rads).abs();
        if geo_margin < astro::deg_to_rad(self.setup.geosat_avoid_angle_deg) {
            return false;
        }

        let ha = astro::hour_angle_rads(sky.lmst_rads, target.ra2000_rads);
        match astro::time_until_set_rads(
            sky.site_lat_rads,
            target.dec2000_rads,
            ha,
            self.setup.site_horizon_deg,
        ) {
            None => true, // circumpolar
            Some(remaining) => remaining >= self.setup.min_remaining_rads(),
        }
    }

    fn find_secondaries(
        &self,
        primary_id: TargetId,
        wanted: usize,
        sky: &SkyState,
        chosen_range: &ObsRange,
        min_separation_beamsizes: f64,
    ) -> Vec<TargetId> {
        if wanted == 0 {
            return Vec::new();
        }
        let primary = &self.targets[&primary_id];
        let Some(low_freq_mhz) = chosen_range.min_value() else {
            return Vec::new();
        };

        let beam_radius = self.setup.primary_beamsize_rads(low_freq_mhz) / 2.0;
        let min_separation =
            min_separation_beamsizes * self.setup.synth_beamsize_rads(low_freq_mhz);

        let mut picked: Vec<TargetId> = Vec::new();
        for (&id, candidate) in &self.targets {
            if picked.len() >= wanted {
                break;
            }
            if id == primary_id || candidate.in_use {
                continue;
            }
            if !self.is_selectable(candidate, sky, false) {
                continue;
            }

            // Must be co-observable within the primary beam.
            let sep_from_primary = astro::angular_separation_rads(
                primary.ra2000_rads,
                primary.dec2000_rads,
                candidate.ra2000_rads,
                candidate.dec2000_rads,
            );
            if sep_from_primary > beam_radius || sep_from_primary < min_separation {
                continue;
            }

            // The chosen range must still be fresh for the secondary.
            let mut fresh = chosen_range.clone();
            fresh.subtract_range(&candidate.observed);
            if fresh.is_empty() {
                continue;
            }

            let far_enough = picked.iter().all(|picked_id| {
                let other = &self.targets[picked_id];
                astro::angular_separation_rads(
                    other.ra2000_rads,
                    other.dec2000_rads,
                    candidate.ra2000_rads,
                    candidate.dec2000_rads,
                ) >= min_separation
            });
            if far_enough {
                picked.push(id);
            }
        }
        picked
    }
}

/// Per-invocation sky geometry shared by every predicate.
#[derive(Debug)]
struct SkyState {
    lmst_rads: f64,
    site_lat_rads: f64,
    sun: astro::SkyPosition,
    moon: astro::SkyPosition,
    geosat_belt_dec_rads: f64,
}

impl SkyState {
    fn compute(setup: &SchedulerSetup, obs_time: DateTime<Utc>) -> Self {
        let site_lat_rads = astro::deg_to_rad(setup.site_latitude_north_deg);
        Self {
            lmst_rads: astro::lmst_rads(obs_time, setup.site_longitude_west_deg),
            site_lat_rads,
            sun: astro::sun_position(obs_time),
            moon: astro::moon_position(obs_time),
            geosat_belt_dec_rads: astro::geosat_belt_dec_rads(site_lat_rads),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MeritFactor;
    use chrono::TimeZone;

    fn setup() -> SchedulerSetup {
        SchedulerSetup {
            site_longitude_west_deg: 121.47,
            site_latitude_north_deg: 40.82,
            site_horizon_deg: 18.0,
            allowed: ObsRange::from_interval(1410.0, 1730.0),
            permanent_rfi: ObsRange::new(),
            min_acceptable_remaining_band_mhz: 2.5,
            min_reserved_followup_obs: 1,
            obs_length_secs: 98,
            sun_avoid_angle_deg: 45.0,
            moon_avoid_angle_deg: 10.0,
            geosat_avoid_angle_deg: 5.0,
            zenith_avoid_angle_deg: 3.0,
            dec_lower_limit_deg: -34.0,
            dec_upper_limit_deg: 90.0,
            high_priority_catalogs: HashSet::from(["habcat".to_string()]),
            low_priority_catalogs: HashSet::new(),
            merit: TargetMerit::new(vec![
                MeritFactor::Catalog,
                MeritFactor::PrimaryId,
                MeritFactor::Meridian,
                MeritFactor::CompletelyObs,
                MeritFactor::TimeLeft,
            ]),
            dec_preference: DecPreference::FavorLower,
            max_dist_light_years: 225.0,
            primary_beamsize_at_one_ghz_arcsec: 12_600.0,
            synth_beamsize_at_one_ghz_arcsec: 1_167.0,
            primary_id_rotation_window: 4,
        }
    }

    fn obs_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 10, 6, 23, 0, 56).unwrap()
    }

    /// A target pinned near the local meridian for the test obs time, so it
    /// is comfortably up from the test site.
    fn overhead_target(id: i64, primary: i64, catalog: &str) -> Target {
        let lmst = astro::lmst_rads(obs_time(), 121.47);
        Target::new(
            TargetId(id),
            TargetId(primary),
            lmst,
            astro::deg_to_rad(35.0),
            catalog,
        )
    }

    #[test]
    fn no_targets_means_a_typed_error() {
        let mut scheduler = TargetScheduler::new(setup());
        let err = scheduler
            .choose_targets(1, obs_time(), 2.0, false)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuitableTarget));
    }

    #[test]
    fn exhausted_primary_falls_back_to_next_best() {
        let mut scheduler = TargetScheduler::new(setup());

        // Higher-merit target already fully observed.
        let mut exhausted = overhead_target(1, 100, "habcat");
        exhausted.observed = ObsRange::from_interval(1410.0, 1730.0);
        scheduler.insert_target(exhausted);

        let mut fresh = overhead_target(2, 101, "habcat");
        // Offset slightly so separation constraints cannot interfere.
        fresh.ra2000_rads += 0.02;
        scheduler.insert_target(fresh);

        let choice = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        assert_eq!(choice.primary_target, TargetId(2));
    }

    #[test]
    fn exhausted_everything_is_no_target() {
        let mut scheduler = TargetScheduler::new(setup());
        let mut exhausted = overhead_target(1, 100, "habcat");
        exhausted.observed = ObsRange::from_interval(1410.0, 1730.0);
        scheduler.insert_target(exhausted);

        let err = scheduler
            .choose_targets(1, obs_time(), 2.0, false)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSuitableTarget));
    }

    #[test]
    fn chosen_range_is_disjoint_from_observed_and_wide_enough() {
        let mut scheduler = TargetScheduler::new(setup());
        let mut target = overhead_target(1, 100, "habcat");
        target.observed = ObsRange::from_interval(1410.0, 1500.0);
        scheduler.insert_target(target);

        let choice = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        let chosen = &choice.chosen_obs_range;
        assert!(!chosen.is_empty());
        assert!(chosen.min_value().unwrap() >= 1500.0);
        for interval in chosen.intervals() {
            assert!(interval.width_mhz() >= 2.5);
        }
        let observed = ObsRange::from_interval(1410.0, 1500.0);
        assert!(chosen.intersect(&observed).is_empty());
    }

    #[test]
    fn permanent_rfi_is_carved_out_of_the_choice() {
        let mut config = setup();
        config.permanent_rfi = ObsRange::from_interval(1420.0, 1430.0);
        let mut scheduler = TargetScheduler::new(config);
        scheduler.insert_target(overhead_target(1, 100, "habcat"));

        let choice = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        assert!(!choice.chosen_obs_range.includes_value(1425.0));
    }

    #[test]
    fn secondaries_stay_in_beam_and_apart() {
        let mut scheduler = TargetScheduler::new(setup());
        let primary = overhead_target(1, 100, "habcat");
        let primary_ra = primary.ra2000_rads;
        let primary_dec = primary.dec2000_rads;
        scheduler.insert_target(primary);

        // The primary beam at 1410 MHz is ~2.5 deg across (radius ~1.24 deg);
        // two synth beamsizes is a ~0.46 deg separation floor.
        let in_beam_offset = astro::deg_to_rad(0.30);
        for (id, mult) in [(2i64, 2.0f64), (3, 4.0), (4, 60.0)] {
            let mut t = overhead_target(id, 100 + id, "habcat");
            t.ra2000_rads = primary_ra + in_beam_offset * mult;
            t.dec2000_rads = primary_dec;
            scheduler.insert_target(t);
        }

        let choice = scheduler.choose_targets(3, obs_time(), 2.0, false).unwrap();
        assert_eq!(choice.primary_target, TargetId(1));
        // Target 4 is far outside the beam; 2 and 3 qualify.
        assert_eq!(choice.additional_targets, vec![TargetId(2), TargetId(3)]);

        let low = choice.chosen_obs_range.min_value().unwrap();
        let beam_radius =
            scheduler.setup().primary_beamsize_rads(low) / 2.0;
        for id in &choice.additional_targets {
            let t = scheduler.target(*id).unwrap();
            let sep = astro::angular_separation_rads(
                primary_ra,
                primary_dec,
                t.ra2000_rads,
                t.dec2000_rads,
            );
            assert!(sep <= beam_radius);
        }
    }

    #[test]
    fn in_use_targets_are_skipped_while_activities_run() {
        let mut scheduler = TargetScheduler::new(setup());
        scheduler.insert_target(overhead_target(1, 100, "habcat"));
        let mut other = overhead_target(2, 101, "habcat");
        other.ra2000_rads += 0.02;
        scheduler.insert_target(other);

        let first = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        assert_eq!(first.primary_target, TargetId(1));

        // With an activity running, the held target is unavailable.
        let second = scheduler.choose_targets(1, obs_time(), 2.0, true).unwrap();
        assert_eq!(second.primary_target, TargetId(2));
    }

    #[test]
    fn rotation_zeroes_the_fairness_bonus() {
        let mut scheduler = TargetScheduler::new(setup());
        scheduler.insert_target(overhead_target(1, 100, "habcat"));
        let mut other = overhead_target(2, 101, "habcat");
        other.ra2000_rads += 0.02;
        scheduler.insert_target(other);

        let first = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        assert_eq!(first.primary_group, TargetId(100));
        scheduler.release_targets(&first);
        scheduler.rotate_primary_target_ids();

        // Group 100 lost its bonus, so the slightly-off-meridian target in
        // group 101 now wins.
        let second = scheduler.choose_targets(1, obs_time(), 2.0, false).unwrap();
        assert_eq!(second.primary_group, TargetId(101));
    }
}

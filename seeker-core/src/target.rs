use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use seeker_model::TargetId;

use crate::astro;
use crate::error::{CoreError, Result};
use crate::obs_range::ObsRange;

/// One candidate sky target with its mutable observation state.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub primary_target_id: TargetId,
    pub ra2000_rads: f64,
    pub dec2000_rads: f64,
    pub catalog: String,
    pub dist_light_years: Option<f64>,
    /// Frequency bands already observed on this target.
    pub observed: ObsRange,
    /// Held by a running activity; excluded from selection until released.
    pub in_use: bool,
    pub last_observed: Option<DateTime<Utc>>,
}

impl Target {
    pub fn new(
        id: TargetId,
        primary_target_id: TargetId,
        ra2000_rads: f64,
        dec2000_rads: f64,
        catalog: impl Into<String>,
    ) -> Self {
        Self {
            id,
            primary_target_id,
            ra2000_rads,
            dec2000_rads,
            catalog: catalog.into(),
            dist_light_years: None,
            observed: ObsRange::new(),
            in_use: false,
            last_observed: None,
        }
    }

    /// Portion of the allowed spectrum not yet observed on this target.
    pub fn unobserved_within(&self, allowed: &ObsRange) -> ObsRange {
        let mut remaining = allowed.clone();
        remaining.subtract_range(&self.observed);
        remaining
    }
}

/// The merit factors a scheduler may multiply together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeritFactor {
    Dist,
    Catalog,
    Dec,
    CompletelyObs,
    Meridian,
    TimeLeft,
    PrimaryId,
}

impl MeritFactor {
    pub fn name(&self) -> &'static str {
        match self {
            MeritFactor::Dist => "dist",
            MeritFactor::Catalog => "catalog",
            MeritFactor::Dec => "dec",
            MeritFactor::CompletelyObs => "completelyobs",
            MeritFactor::Meridian => "meridian",
            MeritFactor::TimeLeft => "timeleft",
            MeritFactor::PrimaryId => "primaryid",
        }
    }
}

impl FromStr for MeritFactor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dist" => Ok(MeritFactor::Dist),
            "catalog" => Ok(MeritFactor::Catalog),
            "dec" => Ok(MeritFactor::Dec),
            "completelyobs" => Ok(MeritFactor::CompletelyObs),
            "meridian" => Ok(MeritFactor::Meridian),
            "timeleft" => Ok(MeritFactor::TimeLeft),
            "primaryid" => Ok(MeritFactor::PrimaryId),
            other => Err(CoreError::UnknownMeritFactor(other.to_string())),
        }
    }
}

/// Preference direction for the declination factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecPreference {
    #[default]
    FavorLower,
    FavorHigher,
}

/// Everything merit evaluation needs besides the target itself.
#[derive(Debug)]
pub struct MeritContext<'a> {
    pub lmst_rads: f64,
    /// Angular time the target must stay up, as an hour angle in radians.
    pub min_remaining_rads: f64,
    /// Hour angle a target still has before setting; computed per target.
    pub site_lat_rads: f64,
    pub horizon_deg: f64,
    pub allowed: &'a ObsRange,
    pub high_priority_catalogs: &'a HashSet<String>,
    pub low_priority_catalogs: &'a HashSet<String>,
    /// Primary groups whose fairness bonus is currently zeroed.
    pub recently_used_primaries: &'a HashSet<TargetId>,
    pub dec_preference: DecPreference,
    pub max_dist_light_years: f64,
}

const HIGH_PRIORITY_CATALOG_MERIT: f64 = 100.0;
const DEFAULT_CATALOG_MERIT: f64 = 10.0;
const LOW_PRIORITY_CATALOG_MERIT: f64 = 1.0;
const PRIMARY_ID_FAIRNESS_BONUS: f64 = 2.0;
const TIME_LEFT_SCALE: f64 = 20.0;

/// Multiplies a configured set of bounded factors; any factor at or below
/// zero rejects the target outright.
#[derive(Debug, Clone)]
pub struct TargetMerit {
    factors: Vec<MeritFactor>,
}

impl TargetMerit {
    pub fn new(factors: Vec<MeritFactor>) -> Self {
        Self { factors }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let factors = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(factors))
    }

    pub fn factors(&self) -> &[MeritFactor] {
        &self.factors
    }

    /// Overall merit; `None` when any factor rejects the target.
    pub fn overall_merit(&self, target: &Target, ctx: &MeritContext<'_>) -> Option<f64> {
        let mut merit = 1.0;
        for factor in &self.factors {
            let value = self.factor_merit(*factor, target, ctx);
            if value <= 0.0 {
                return None;
            }
            merit *= value;
        }
        Some(merit)
    }

    fn factor_merit(&self, factor: MeritFactor, target: &Target, ctx: &MeritContext<'_>) -> f64 {
        match factor {
            MeritFactor::Dist => dist_merit(target, ctx),
            MeritFactor::Catalog => catalog_merit(target, ctx),
            MeritFactor::Dec => dec_merit(target, ctx),
            MeritFactor::CompletelyObs => completely_observed_merit(target, ctx),
            MeritFactor::Meridian => meridian_merit(target, ctx),
            MeritFactor::TimeLeft => time_left_merit(target, ctx),
            MeritFactor::PrimaryId => primary_id_merit(target, ctx),
        }
    }
}

fn dist_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    match target.dist_light_years {
        Some(dist) => (ctx.max_dist_light_years - dist) / ctx.max_dist_light_years,
        None => 1.0,
    }
}

fn catalog_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    if ctx.high_priority_catalogs.contains(&target.catalog) {
        HIGH_PRIORITY_CATALOG_MERIT
    } else if ctx.low_priority_catalogs.contains(&target.catalog) {
        LOW_PRIORITY_CATALOG_MERIT
    } else {
        DEFAULT_CATALOG_MERIT
    }
}

/// Cubic preference toward one end of the declination range.
fn dec_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    let max_dec = std::f64::consts::FRAC_PI_2;
    let linear = match ctx.dec_preference {
        DecPreference::FavorLower => max_dec - target.dec2000_rads + 1.0,
        DecPreference::FavorHigher => target.dec2000_rads + max_dec + 1.0,
    };
    linear * linear * linear
}

/// Fraction of the allowed band still unobserved.
fn completely_observed_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    let total = ctx.allowed.total_bandwidth_mhz();
    if total <= 0.0 {
        return 0.0;
    }
    let observed = ctx.allowed.intersect(&target.observed).total_bandwidth_mhz();
    (total - observed) / total
}

/// Closeness of the current hour angle to the meridian, in (0, 1].
fn meridian_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    let ha = astro::hour_angle_rads(ctx.lmst_rads, target.ra2000_rads).abs();
    (std::f64::consts::PI - ha) / std::f64::consts::PI
}

/// Monotone in remaining up-time beyond the reserved followup headroom;
/// zero (reject) once the headroom cannot be met.
fn time_left_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    let ha = astro::hour_angle_rads(ctx.lmst_rads, target.ra2000_rads);
    let Some(time_until_set) =
        astro::time_until_set_rads(ctx.site_lat_rads, target.dec2000_rads, ha, ctx.horizon_deg)
    else {
        // Circumpolar: as much headroom as anything can have.
        return (std::f64::consts::PI + TIME_LEFT_SCALE) / TIME_LEFT_SCALE;
    };

    let margin = time_until_set - ctx.min_remaining_rads;
    if margin < 0.0 {
        0.0
    } else {
        (margin + TIME_LEFT_SCALE) / TIME_LEFT_SCALE
    }
}

fn primary_id_merit(target: &Target, ctx: &MeritContext<'_>) -> f64 {
    if ctx.recently_used_primaries.contains(&target.primary_target_id) {
        1.0
    } else {
        1.0 + PRIMARY_ID_FAIRNESS_BONUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        allowed: &'a ObsRange,
        high: &'a HashSet<String>,
        low: &'a HashSet<String>,
        recent: &'a HashSet<TargetId>,
    ) -> MeritContext<'a> {
        MeritContext {
            lmst_rads: 0.0,
            min_remaining_rads: 0.1,
            site_lat_rads: astro::deg_to_rad(40.0),
            horizon_deg: 18.0,
            allowed,
            high_priority_catalogs: high,
            low_priority_catalogs: low,
            recently_used_primaries: recent,
            dec_preference: DecPreference::FavorLower,
            max_dist_light_years: 225.0,
        }
    }

    #[test]
    fn unknown_factor_names_are_rejected() {
        let err = TargetMerit::from_names(["catalog", "luck"]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMeritFactor(name) if name == "luck"));
    }

    #[test]
    fn fully_observed_target_is_rejected() {
        let allowed = ObsRange::from_interval(1410.0, 1730.0);
        let high = HashSet::new();
        let low = HashSet::new();
        let recent = HashSet::new();
        let ctx = context(&allowed, &high, &low, &recent);

        let mut target = Target::new(TargetId(1), TargetId(100), 0.0, 0.3, "habcat");
        target.observed = allowed.clone();

        let merit = TargetMerit::new(vec![MeritFactor::CompletelyObs]);
        assert!(merit.overall_merit(&target, &ctx).is_none());
    }

    #[test]
    fn high_priority_catalog_outranks_low() {
        let allowed = ObsRange::from_interval(1410.0, 1730.0);
        let mut high = HashSet::new();
        high.insert("habcat".to_string());
        let mut low = HashSet::new();
        low.insert("tycho2subset".to_string());
        let recent = HashSet::new();
        let ctx = context(&allowed, &high, &low, &recent);

        let a = Target::new(TargetId(1), TargetId(100), 0.0, 0.3, "habcat");
        let b = Target::new(TargetId(2), TargetId(101), 0.0, 0.3, "tycho2subset");

        let merit = TargetMerit::new(vec![MeritFactor::Catalog]);
        let ma = merit.overall_merit(&a, &ctx).unwrap();
        let mb = merit.overall_merit(&b, &ctx).unwrap();
        assert!(ma > mb);
    }

    #[test]
    fn recently_used_primary_loses_its_bonus() {
        let allowed = ObsRange::from_interval(1410.0, 1730.0);
        let high = HashSet::new();
        let low = HashSet::new();
        let mut recent = HashSet::new();
        recent.insert(TargetId(100));
        let ctx = context(&allowed, &high, &low, &recent);

        let used = Target::new(TargetId(1), TargetId(100), 0.0, 0.3, "habcat");
        let fresh = Target::new(TargetId(2), TargetId(101), 0.0, 0.3, "habcat");

        let merit = TargetMerit::new(vec![MeritFactor::PrimaryId]);
        let m_used = merit.overall_merit(&used, &ctx).unwrap();
        let m_fresh = merit.overall_merit(&fresh, &ctx).unwrap();
        assert!(m_fresh > m_used);
    }

    #[test]
    fn setting_target_without_headroom_is_rejected() {
        let allowed = ObsRange::from_interval(1410.0, 1730.0);
        let high = HashSet::new();
        let low = HashSet::new();
        let recent = HashSet::new();
        let mut ctx = context(&allowed, &high, &low, &recent);
        ctx.min_remaining_rads = 3.0; // absurd headroom nothing can satisfy

        let target = Target::new(TargetId(1), TargetId(100), 0.0, 0.3, "habcat");
        let merit = TargetMerit::new(vec![MeritFactor::TimeLeft]);
        assert!(merit.overall_merit(&target, &ctx).is_none());
    }

    #[test]
    fn meridian_merit_peaks_on_the_meridian() {
        let allowed = ObsRange::from_interval(1410.0, 1730.0);
        let high = HashSet::new();
        let low = HashSet::new();
        let recent = HashSet::new();
        let ctx = context(&allowed, &high, &low, &recent);

        let on_meridian = Target::new(TargetId(1), TargetId(100), 0.0, 0.3, "x");
        let off_meridian = Target::new(TargetId(2), TargetId(100), 1.5, 0.3, "x");

        let merit = TargetMerit::new(vec![MeritFactor::Meridian]);
        assert!(
            merit.overall_merit(&on_meridian, &ctx).unwrap()
                > merit.overall_merit(&off_meridian, &ctx).unwrap()
        );
    }
}

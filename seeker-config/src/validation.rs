use std::fmt;

use crate::models::SeekerConfig;

/// One config guard-rail violation. Validation collects every violation so
/// the operator fixes a file in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigViolation {
    pub field: &'static str,
    pub problem: String,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

fn violation(field: &'static str, problem: impl Into<String>) -> ConfigViolation {
    ConfigViolation {
        field,
        problem: problem.into(),
    }
}

const KNOWN_MERIT_FACTORS: &[&str] = &[
    "dist",
    "catalog",
    "dec",
    "completelyobs",
    "meridian",
    "timeleft",
    "primaryid",
];

pub fn validate(config: &SeekerConfig) -> Vec<ConfigViolation> {
    let mut out = Vec::new();
    let sched = &config.scheduler;
    let act = &config.activity;

    if sched.allowed_low_freq_mhz >= sched.allowed_high_freq_mhz {
        out.push(violation(
            "scheduler.allowed_low_freq_mhz",
            format!(
                "allowed range is empty ({} >= {})",
                sched.allowed_low_freq_mhz, sched.allowed_high_freq_mhz
            ),
        ));
    }
    if sched.allowed_low_freq_mhz < 0.0 {
        out.push(violation(
            "scheduler.allowed_low_freq_mhz",
            "frequencies must be non-negative",
        ));
    }
    if sched.min_acceptable_remaining_band_mhz <= 0.0 {
        out.push(violation(
            "scheduler.min_acceptable_remaining_band_mhz",
            "must be positive",
        ));
    }
    if sched.max_tuning_spread_mhz <= 0.0 {
        out.push(violation(
            "scheduler.max_tuning_spread_mhz",
            "must be positive",
        ));
    }
    if sched.smallest_detector_bandwidth_mhz <= 0.0 {
        out.push(violation(
            "scheduler.smallest_detector_bandwidth_mhz",
            "must be positive",
        ));
    }
    if sched.total_channels <= 0 {
        out.push(violation("scheduler.total_channels", "must be positive"));
    }
    if sched.dec_lower_limit_deg >= sched.dec_upper_limit_deg {
        out.push(violation(
            "scheduler.dec_lower_limit_deg",
            "declination window is empty",
        ));
    }
    if !(-90.0..=90.0).contains(&sched.site_latitude_north_deg) {
        out.push(violation(
            "scheduler.site_latitude_north_deg",
            "latitude out of [-90, 90]",
        ));
    }
    if sched.merit_factors.is_empty() {
        out.push(violation(
            "scheduler.merit_factors",
            "at least one merit factor is required",
        ));
    }
    for factor in &sched.merit_factors {
        if !KNOWN_MERIT_FACTORS.contains(&factor.as_str()) {
            out.push(violation(
                "scheduler.merit_factors",
                format!("unknown merit factor '{factor}'"),
            ));
        }
    }
    if sched.min_target_separation_beamsizes < 1.0 {
        out.push(violation(
            "scheduler.min_target_separation_beamsizes",
            "separations under one beamsize cannot be resolved",
        ));
    }

    if act.data_collection_length_secs == 0 {
        out.push(violation(
            "activity.data_collection_length_secs",
            "must be positive",
        ));
    }
    if act.min_rfi_mask_element_width_mhz <= 0.0 {
        out.push(violation(
            "activity.min_rfi_mask_element_width_mhz",
            "must be positive",
        ));
    }

    if config.database.use_database && config.database.url.is_empty() {
        out.push(violation(
            "database.url",
            "required when use_database is on",
        ));
    }
    if config.database.max_connections == 0 {
        out.push(violation("database.max_connections", "must be positive"));
    }

    if config.topology.expected_components_file.is_empty() {
        out.push(violation(
            "topology.expected_components_file",
            "path is required",
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_clean() {
        assert!(validate(&SeekerConfig::default()).is_empty());
    }

    #[test]
    fn unknown_merit_factor_is_flagged() {
        let mut config = SeekerConfig::default();
        config.scheduler.merit_factors.push("luck".to_string());
        let violations = validate(&config);
        assert!(violations
            .iter()
            .any(|v| v.problem.contains("unknown merit factor")));
    }
}

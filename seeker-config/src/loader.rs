use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::models::SeekerConfig;
use crate::validation::{validate, ConfigViolation};

/// Failures while reading or validating a config file.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config file {path} failed validation:\n{}", format_violations(.violations))]
    Invalid {
        path: String,
        violations: Vec<ConfigViolation>,
    },
}

fn format_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Load and validate a config file. A missing path yields the built-in
/// defaults (which are themselves validated, so a bad default is caught in
/// tests rather than at a telescope).
pub fn load_config(path: Option<&Path>) -> Result<SeekerConfig, ConfigLoadError> {
    let (config, shown_path) = match path {
        None => (SeekerConfig::default(), "<defaults>".to_string()),
        Some(path) => {
            let shown = path.display().to_string();
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
                path: shown.clone(),
                source,
            })?;
            let parsed =
                toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
                    path: shown.clone(),
                    source,
                })?;
            (parsed, shown)
        }
    };

    let violations = validate(&config);
    if violations.is_empty() {
        info!(config = %shown_path, "configuration loaded");
        Ok(config)
    } else {
        Err(ConfigLoadError::Invalid {
            path: shown_path,
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_pass_validation() {
        let config = load_config(None).unwrap();
        assert_eq!(config.server.detector_port, 8888);
        assert!(config.scheduler.allowed_low_freq_mhz < config.scheduler.allowed_high_freq_mhz);
    }

    #[test]
    fn partial_files_are_filled_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scheduler]\nsite_longitude_west_deg = 121.47\nsite_latitude_north_deg = 40.82\n\
             site_horizon_deg = 18.0\nallowed_low_freq_mhz = 1000.0\nallowed_high_freq_mhz = 2000.0\n\
             min_acceptable_remaining_band_mhz = 2.5\nmax_tuning_spread_mhz = 50.0\n\
             smallest_detector_bandwidth_mhz = 2.1\ntotal_channels = 256\n\
             min_reserved_followup_obs = 12\n\
             obs_length_secs = 98\nsun_avoid_angle_deg = 60.0\nmoon_avoid_angle_deg = 10.0\n\
             geosat_avoid_angle_deg = 5.0\nzenith_avoid_angle_deg = 3.0\n\
             dec_lower_limit_deg = -34.0\ndec_upper_limit_deg = 90.0\n\
             high_priority_catalogs = [\"habcat\"]\nlow_priority_catalogs = []\n\
             merit_factors = [\"catalog\"]\nmin_target_separation_beamsizes = 2.0\n\
             primary_beamsize_at_one_ghz_arcsec = 12600.0\nsynth_beamsize_at_one_ghz_arcsec = 1167.0\n\
             primary_id_rotation_window = 120\nprimary_id_rotation_interval_secs = 3600"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.scheduler.allowed_low_freq_mhz, 1000.0);
        // Untouched sections keep their defaults.
        assert_eq!(config.server.telescope_port, 5577);
    }

    #[test]
    fn bad_ranges_are_all_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scheduler]\nsite_longitude_west_deg = 121.47\nsite_latitude_north_deg = 40.82\n\
             site_horizon_deg = 18.0\nallowed_low_freq_mhz = 2000.0\nallowed_high_freq_mhz = 1000.0\n\
             min_acceptable_remaining_band_mhz = -1.0\nmax_tuning_spread_mhz = 50.0\n\
             smallest_detector_bandwidth_mhz = 2.1\ntotal_channels = 256\n\
             min_reserved_followup_obs = 12\n\
             obs_length_secs = 98\nsun_avoid_angle_deg = 60.0\nmoon_avoid_angle_deg = 10.0\n\
             geosat_avoid_angle_deg = 5.0\nzenith_avoid_angle_deg = 3.0\n\
             dec_lower_limit_deg = -34.0\ndec_upper_limit_deg = 90.0\n\
             high_priority_catalogs = []\nlow_priority_catalogs = []\n\
             merit_factors = [\"catalog\"]\nmin_target_separation_beamsizes = 2.0\n\
             primary_beamsize_at_one_ghz_arcsec = 12600.0\nsynth_beamsize_at_one_ghz_arcsec = 1167.0\n\
             primary_id_rotation_window = 120\nprimary_id_rotation_interval_secs = 3600"
        )
        .unwrap();

        match load_config(Some(file.path())) {
            Err(ConfigLoadError::Invalid { violations, .. }) => {
                assert!(violations.len() >= 2, "got: {violations:?}");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}

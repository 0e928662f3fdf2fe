use serde::{Deserialize, Serialize};

/// Top-level configuration for one seeker process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SeekerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Listen ports and site identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub site_name: String,
    pub detector_port: u16,
    pub if_chain_port: u16,
    pub test_signal_port: u16,
    pub telescope_port: u16,
    pub archiver_port: u16,
    pub channelizer_port: u16,
    pub component_control_port: u16,
    pub admin_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            site_name: "ATA".to_string(),
            detector_port: 8888,
            if_chain_port: 8899,
            test_signal_port: 6677,
            telescope_port: 5577,
            archiver_port: 8850,
            channelizer_port: 8870,
            component_control_port: 8866,
            admin_port: 2555,
        }
    }
}

/// Relational database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub use_database: bool,
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            use_database: true,
            url: "postgres://seeker@localhost/seeker".to_string(),
            max_connections: 8,
        }
    }
}

/// Target selection limits and merit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// West longitude of the site in degrees.
    pub site_longitude_west_deg: f64,
    /// North latitude of the site in degrees.
    pub site_latitude_north_deg: f64,
    /// Effective horizon elevation in degrees.
    pub site_horizon_deg: f64,

    pub allowed_low_freq_mhz: f64,
    pub allowed_high_freq_mhz: f64,
    pub min_acceptable_remaining_band_mhz: f64,
    pub max_tuning_spread_mhz: f64,
    pub smallest_detector_bandwidth_mhz: f64,
    /// Channel count assumed when no channelizer has reported intrinsics.
    pub total_channels: i32,
    pub min_reserved_followup_obs: u32,
    pub obs_length_secs: u32,

    pub sun_avoid_angle_deg: f64,
    pub moon_avoid_angle_deg: f64,
    pub geosat_avoid_angle_deg: f64,
    pub zenith_avoid_angle_deg: f64,
    pub dec_lower_limit_deg: f64,
    pub dec_upper_limit_deg: f64,

    pub high_priority_catalogs: Vec<String>,
    pub low_priority_catalogs: Vec<String>,
    /// Merit factors to multiply, in `TargetMerit` name vocabulary.
    pub merit_factors: Vec<String>,

    pub min_target_separation_beamsizes: f64,
    pub primary_beamsize_at_one_ghz_arcsec: f64,
    pub synth_beamsize_at_one_ghz_arcsec: f64,

    /// How many recently used primary groups lose their fairness bonus.
    pub primary_id_rotation_window: usize,
    pub primary_id_rotation_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            site_longitude_west_deg: 121.47,
            site_latitude_north_deg: 40.82,
            site_horizon_deg: 18.0,
            allowed_low_freq_mhz: 1410.0,
            allowed_high_freq_mhz: 1730.0,
            min_acceptable_remaining_band_mhz: 2.5,
            max_tuning_spread_mhz: 50.0,
            smallest_detector_bandwidth_mhz: 2.1,
            total_channels: 256,
            min_reserved_followup_obs: 12,
            obs_length_secs: 98,
            sun_avoid_angle_deg: 60.0,
            moon_avoid_angle_deg: 10.0,
            geosat_avoid_angle_deg: 5.0,
            zenith_avoid_angle_deg: 3.0,
            dec_lower_limit_deg: -34.0,
            dec_upper_limit_deg: 90.0,
            high_priority_catalogs: vec![
                "galsurvey".to_string(),
                "nearest".to_string(),
                "habcat".to_string(),
            ],
            low_priority_catalogs: vec![
                "tycho2subset".to_string(),
                "tycho2remainder".to_string(),
            ],
            merit_factors: vec![
                "catalog".to_string(),
                "primaryid".to_string(),
                "meridian".to_string(),
                "completelyobs".to_string(),
                "timeleft".to_string(),
            ],
            min_target_separation_beamsizes: 2.0,
            primary_beamsize_at_one_ghz_arcsec: 12_600.0,
            synth_beamsize_at_one_ghz_arcsec: 1_167.0,
            primary_id_rotation_window: 120,
            primary_id_rotation_interval_secs: 3_600,
        }
    }
}

/// Activity pacing and per-stage watchdog deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityConfig {
    pub start_time_offset_secs: u32,
    pub data_collection_length_secs: u32,
    pub component_ready_timeout_secs: u64,
    pub detector_tuned_timeout_secs: u64,
    pub data_collection_timeout_margin_secs: u64,
    pub signal_detection_timeout_secs: u64,
    pub act_unit_complete_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub followup_enabled: bool,
    pub create_recent_rfi_mask: bool,
    pub min_rfi_mask_element_width_mhz: f64,
    pub data_products_dir: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_time_offset_secs: 30,
            data_collection_length_secs: 98,
            component_ready_timeout_secs: 120,
            detector_tuned_timeout_secs: 60,
            data_collection_timeout_margin_secs: 60,
            signal_detection_timeout_secs: 300,
            act_unit_complete_timeout_secs: 120,
            stop_timeout_secs: 30,
            followup_enabled: true,
            create_recent_rfi_mask: true,
            min_rfi_mask_element_width_mhz: 0.001,
            data_products_dir: "/var/lib/seeker/data-products".to_string(),
        }
    }
}

/// Location of the expected-components description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    pub expected_components_file: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            expected_components_file: "/etc/seeker/expectedComponents.cfg".to_string(),
        }
    }
}

//! Just enough positional astronomy for target selection: sidereal time,
//! horizon geometry with refraction, solar/lunar avoidance positions, and
//! the geostationary-belt declination. Low-precision series are fine here;
//! avoidance angles are whole degrees.

use chrono::{DateTime, Utc};

pub const SECS_PER_HOUR: f64 = 3600.0;
pub const HOURS_PER_DAY: f64 = 24.0;

/// Ratio of a sidereal day to a solar day.
const SIDEREAL_RATE: f64 = 1.002_737_909_35;

const J2000_JD: f64 = 2_451_545.0;

pub fn deg_to_rad(deg: f64) -> f64 {
    deg.to_radians()
}

pub fn rad_to_deg(rad: f64) -> f64 {
    rad.to_degrees()
}

pub fn hours_to_rad(hours: f64) -> f64 {
    hours * std::f64::consts::PI / 12.0
}

pub fn rad_to_hours(rad: f64) -> f64 {
    rad * 12.0 / std::f64::consts::PI
}

/// Julian date for a UTC instant.
pub fn julian_date(time: DateTime<Utc>) -> f64 {
    let unix = time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1e6;
    unix / 86_400.0 + 2_440_587.5
}

/// Greenwich mean sidereal time in hours, [0, 24).
pub fn gmst_hours(time: DateTime<Utc>) -> f64 {
    let days = julian_date(time) - J2000_JD;
    let gmst = 18.697_374_558 + 24.065_709_824_419_08 * days;
    gmst.rem_euclid(HOURS_PER_DAY)
}

/// Local mean sidereal time in radians for a site at `longitude_west_deg`.
pub fn lmst_rads(time: DateTime<Utc>, longitude_west_deg: f64) -> f64 {
    let lmst_hours = (gmst_hours(time) - longitude_west_deg / 15.0).rem_euclid(HOURS_PER_DAY);
    hours_to_rad(lmst_hours)
}

/// Hour angle in radians, normalized to [-pi, pi).
pub fn hour_angle_rads(lmst: f64, ra_rads: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut ha = (lmst - ra_rads).rem_euclid(two_pi);
    if ha >= std::f64::consts::PI {
        ha -= two_pi;
    }
    ha
}

/// Elevation above the horizon in radians.
pub fn elevation_rads(lat_rads: f64, dec_rads: f64, ha_rads: f64) -> f64 {
    (lat_rads.sin() * dec_rads.sin() + lat_rads.cos() * dec_rads.cos() * ha_rads.cos()).asin()
}

/// Bennett refraction at apparent elevation, in radians. Valid from the
/// horizon up; clamped below.
pub fn refraction_rads(elevation_rads: f64) -> f64 {
    let h_deg = rad_to_deg(elevation_rads).max(-1.0);
    let r_arcmin = 1.0 / (deg_to_rad(h_deg + 7.31 / (h_deg + 4.4)).tan());
    deg_to_rad(r_arcmin / 60.0)
}

/// Great-circle separation between two equatorial positions, in radians.
pub fn angular_separation_rads(
    ra1_rads: f64,
    dec1_rads: f64,
    ra2_rads: f64,
    dec2_rads: f64,
) -> f64 {
    let sin_half_ddec = ((dec2_rads - dec1_rads) / 2.0).sin();
    let sin_half_dra = ((ra2_rads - ra1_rads) / 2.0).sin();
    let a = sin_half_ddec * sin_half_ddec
        + dec1_rads.cos() * dec2_rads.cos() * sin_half_dra * sin_half_dra;
    2.0 * a.sqrt().asin()
}

/// How long a position stays above `horizon_deg`, as an hour angle in
/// radians. `None` means it never sets from this site; `Some(0.0)` means it
/// is already below the effective horizon for the rest of its pass.
pub fn time_until_set_rads(
    lat_rads: f64,
    dec_rads: f64,
    ha_rads: f64,
    horizon_deg: f64,
) -> Option<f64> {
    let horizon = deg_to_rad(horizon_deg);
    // Refraction lifts sources into view slightly below the geometric limit.
    let effective_horizon = horizon - refraction_rads(horizon);

    let cos_ha_set = (effective_horizon.sin() - lat_rads.sin() * dec_rads.sin())
        / (lat_rads.cos() * dec_rads.cos());

    if cos_ha_set < -1.0 {
        return None; // circumpolar above this horizon
    }
    if cos_ha_set > 1.0 {
        return Some(0.0); // never rises above this horizon
    }

    let ha_set = cos_ha_set.acos();
    Some((ha_set - ha_rads).max(0.0))
}

/// Convert an hour-angle interval to wall-clock seconds.
pub fn hour_angle_rads_to_secs(rads: f64) -> f64 {
    rad_to_hours(rads) / SIDEREAL_RATE * SECS_PER_HOUR
}

/// Equatorial position (radians) of a solar-system body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub ra_rads: f64,
    pub dec_rads: f64,
}

fn ecliptic_to_equatorial(lambda: f64, beta: f64, epsilon: f64) -> SkyPosition {
    let ra = (lambda.sin() * epsilon.cos() - beta.tan() * epsilon.sin())
        .atan2(lambda.cos());
    let dec =
        (beta.sin() * epsilon.cos() + beta.cos() * epsilon.sin() * lambda.sin()).asin();
    SkyPosition {
        ra_rads: ra.rem_euclid(2.0 * std::f64::consts::PI),
        dec_rads: dec,
    }
}

/// Low-precision solar position, good to a few arcminutes.
pub fn sun_position(time: DateTime<Utc>) -> SkyPosition {
    let n = julian_date(time) - J2000_JD;
    let mean_longitude = deg_to_rad((280.460 + 0.985_647_4 * n).rem_euclid(360.0));
    let mean_anomaly = deg_to_rad((357.528 + 0.985_600_3 * n).rem_euclid(360.0));
    let lambda = mean_longitude
        + deg_to_rad(1.915) * mean_anomaly.sin()
        + deg_to_rad(0.020) * (2.0 * mean_anomaly).sin();
    let epsilon = deg_to_rad(23.439 - 0.000_000_4 * n);
    ecliptic_to_equatorial(lambda, 0.0, epsilon)
}

/// Low-precision lunar position, good to a fraction of a degree, which is
/// far inside the avoidance angle.
pub fn moon_position(time: DateTime<Utc>) -> SkyPosition {
    let n = julian_date(time) - J2000_JD;
    let mean_longitude = deg_to_rad((218.316 + 13.176_396 * n).rem_euclid(360.0));
    let mean_anomaly = deg_to_rad((134.963 + 13.064_993 * n).rem_euclid(360.0));
    let mean_distance = deg_to_rad((93.272 + 13.229_350 * n).rem_euclid(360.0));
    let lambda = mean_longitude + deg_to_rad(6.289) * mean_anomaly.sin();
    let beta = deg_to_rad(5.128) * mean_distance.sin();
    let epsilon = deg_to_rad(23.439 - 0.000_000_4 * n);
    ecliptic_to_equatorial(lambda, beta, epsilon)
}

/// Apparent declination of the geostationary belt as seen from a site at
/// `lat_rads`. Geosats sit on the equator at ~6.61 earth radii, so from a
/// northern site the belt appears at a slightly negative declination.
pub fn geosat_belt_dec_rads(lat_rads: f64) -> f64 {
    const GEO_RADIUS_EARTH_RADII: f64 = 6.611;
    (-lat_rads.sin() / (GEO_RADIUS_EARTH_RADII - lat_rads.cos())).atan()
}

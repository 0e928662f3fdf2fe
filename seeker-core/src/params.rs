use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A single typed parameter with its default and (for numeric kinds) range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub help: String,
    pub value: ParamValue,
    pub default: ParamValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Parameter value kinds mirror what the snapshot tables store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl Parameter {
    pub fn int(name: &str, help: &str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: ParamValue::Int(default),
            default: ParamValue::Int(default),
            min: Some(min as f64),
            max: Some(max as f64),
        }
    }

    pub fn float(name: &str, help: &str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: ParamValue::Float(default),
            default: ParamValue::Float(default),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn boolean(name: &str, help: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: ParamValue::Bool(default),
            default: ParamValue::Bool(default),
            min: None,
            max: None,
        }
    }

    pub fn text(name: &str, help: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: ParamValue::Text(default.to_string()),
            default: ParamValue::Text(default.to_string()),
            min: None,
            max: None,
        }
    }

    fn parse_and_check(&self, raw: &str) -> Result<ParamValue> {
        let parsed = match &self.default {
            ParamValue::Int(_) => ParamValue::Int(raw.parse::<i64>().map_err(|_| {
                CoreError::Parameter(self.name.clone(), format!("'{raw}' is not an integer"))
            })?),
            ParamValue::Float(_) => ParamValue::Float(raw.parse::<f64>().map_err(|_| {
                CoreError::Parameter(self.name.clone(), format!("'{raw}' is not a number"))
            })?),
            ParamValue::Bool(_) => match raw {
                "true" | "on" | "1" => ParamValue::Bool(true),
                "false" | "off" | "0" => ParamValue::Bool(false),
                _ => {
                    return Err(CoreError::Parameter(
                        self.name.clone(),
                        format!("'{raw}' is not a boolean"),
                    ))
                }
            },
            ParamValue::Text(_) => ParamValue::Text(raw.to_string()),
        };

        let numeric = match parsed {
            ParamValue::Int(v) => Some(v as f64),
            ParamValue::Float(v) => Some(v),
            _ => None,
        };
        if let Some(value) = numeric {
            if let Some(min) = self.min {
                if value < min {
                    return Err(CoreError::Parameter(
                        self.name.clone(),
                        format!("{value} is below the minimum {min}"),
                    ));
                }
            }
            if let Some(max) = self.max {
                if value > max {
                    return Err(CoreError::Parameter(
                        self.name.clone(),
                        format!("{value} is above the maximum {max}"),
                    ));
                }
            }
        }
        Ok(parsed)
    }
}

/// A named collection of typed parameters with defaults and ranges, settable
/// by name from the operator surface and snapshottable to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroup {
    name: String,
    params: Vec<Parameter>,
}

impl ParameterGroup {
    pub fn new(name: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn get(&self, param_name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|p| p.name == param_name)
            .map(|p| &p.value)
    }

    pub fn get_float(&self, param_name: &str) -> Option<f64> {
        match self.get(param_name)? {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn set(&mut self, param_name: &str, raw: &str) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == param_name)
            .ok_or_else(|| {
                CoreError::Parameter(param_name.to_string(), "no such parameter".to_string())
            })?;
        param.value = param.parse_and_check(raw)?;
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) {
        for param in &mut self.params {
            param.value = param.default.clone();
        }
    }

    /// Render `name current default [min max]` per line, the shape the admin
    /// surface prints.
    pub fn show(&self) -> String {
        let mut out = String::new();
        for p in &self.params {
            out.push_str(&p.name);
            out.push_str(" = ");
            out.push_str(&p.value.to_string());
            out.push_str(" (default ");
            out.push_str(&p.default.to_string());
            if let (Some(min), Some(max)) = (p.min, p.max) {
                out.push_str(&format!(", range [{min}, {max}]"));
            }
            out.push_str(")\n");
        }
        out
    }
}

#[cfg(feature = "database")]
mod db {
    use super::ParameterGroup;
    use crate::error::Result;
    use seeker_model::ActivityId;
    use sqlx::PgPool;

    impl ParameterGroup {
        /// Snapshot the group for an activity. The snapshot is the full
        /// current state; reloading yields an equal group.
        pub async fn save(&self, pool: &PgPool, activity_id: ActivityId) -> Result<i64> {
            let payload = serde_json::to_value(self).map_err(|err| {
                crate::error::CoreError::Parameter(
                    self.name().to_string(),
                    format!("snapshot serialization failed: {err}"),
                )
            })?;
            let row: (i64,) = sqlx::query_as(
                "INSERT INTO parameter_snapshots (activity_id, group_name, params) \
                 VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(activity_id.0)
            .bind(self.name())
            .bind(payload)
            .fetch_one(pool)
            .await?;
            Ok(row.0)
        }

        pub async fn load(pool: &PgPool, snapshot_id: i64) -> Result<ParameterGroup> {
            let row: (serde_json::Value,) =
                sqlx::query_as("SELECT params FROM parameter_snapshots WHERE id = $1")
                    .bind(snapshot_id)
                    .fetch_one(pool)
                    .await?;
            serde_json::from_value(row.0).map_err(|err| {
                crate::error::CoreError::Parameter(
                    "snapshot".to_string(),
                    format!("snapshot deserialization failed: {err}"),
                )
            })
        }
    }
}

/// The detector activity parameters every observation snapshots.
pub fn detector_activity_params() -> ParameterGroup {
    ParameterGroup::new(
        "dxact",
        vec![
            Parameter::int("length", "data collection length (secs)", 98, 1, 86_400),
            Parameter::float("datareqsubchan", "science data request subchannel", 384.0, 0.0, 1024.0),
            Parameter::boolean("baseinitaccum", "send baseline init accumulation", true),
            Parameter::float(
                "basewarn",
                "baseline warning limit factor",
                3.0,
                0.0,
                1000.0,
            ),
            Parameter::float(
                "baseerror",
                "baseline error limit factor",
                5.0,
                0.0,
                1000.0,
            ),
        ],
    )
}

/// IF chain settings, one group per chain.
pub fn if_chain_params() -> ParameterGroup {
    ParameterGroup::new(
        "ifc",
        vec![
            Parameter::int("attnl", "left attenuator (dB)", 0, 0, 11),
            Parameter::int("attnr", "right attenuator (dB)", 0, 0, 11),
            Parameter::float("varl", "left STX variance target", 16.0, 0.0, 1000.0),
            Parameter::float("varr", "right STX variance target", 16.0, 0.0, 1000.0),
            Parameter::text("ifsource", "input selector (sky or test)", "sky"),
        ],
    )
}

/// Test signal generator settings.
pub fn test_signal_params() -> ParameterGroup {
    ParameterGroup::new(
        "tsig",
        vec![
            Parameter::boolean("generate", "drive a test signal", false),
            Parameter::float("freq", "tone frequency (MHz)", 1420.0, 0.0, 40_000.0),
            Parameter::float("amp", "tone amplitude (dBm)", -90.0, -200.0, 20.0),
            Parameter::float("drift", "drift rate (Hz/s)", 0.1, -10.0, 10.0),
            Parameter::float("width", "pulse width (secs)", 0.7, 0.0, 60.0),
            Parameter::float("period", "pulse period (secs)", 10.0, 0.0, 600.0),
        ],
    )
}

/// Telescope pointing limits and calibration knobs.
pub fn telescope_params() -> ParameterGroup {
    ParameterGroup::new(
        "tscope",
        vec![
            Parameter::float("calfreq", "calibration tone frequency (MHz)", 1420.0, 0.0, 40_000.0),
            Parameter::int("calcycles", "calibration iterations", 2, 1, 100),
            Parameter::int("calintegrate", "calibration integration (secs)", 10, 1, 3600),
            Parameter::float("zfocusmhz", "zfocus frequency (MHz)", 1420.0, 0.0, 40_000.0),
            Parameter::boolean("autowrap", "let the drive pick the wrap", true),
        ],
    )
}

/// Scheduler knobs exposed on the operator surface.
pub fn scheduler_params() -> ParameterGroup {
    ParameterGroup::new(
        "sched",
        vec![
            Parameter::float("beginfreq", "low edge of allowed range (MHz)", 1410.0, 0.0, 40_000.0),
            Parameter::float("endfreq", "high edge of allowed range (MHz)", 1730.0, 0.0, 40_000.0),
            Parameter::float(
                "minbandwidth",
                "minimum acceptable remaining band (MHz)",
                2.5,
                0.0,
                1000.0,
            ),
            Parameter::float("maxspread", "max detector tuning spread (MHz)", 50.0, 0.0, 1000.0),
            Parameter::int("reservedfollowups", "reserved followup observations", 12, 0, 1000),
            Parameter::boolean("multitarget", "observe multiple targets per beam", true),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_respects_type_and_range() {
        let mut group = scheduler_params();
        group.set("maxspread", "40").unwrap();
        assert_eq!(group.get_float("maxspread"), Some(40.0));

        let err = group.set("maxspread", "-1").unwrap_err();
        assert!(matches!(err, CoreError::Parameter(_, _)));
        let err = group.set("maxspread", "plenty").unwrap_err();
        assert!(matches!(err, CoreError::Parameter(_, _)));
        let err = group.set("nosuch", "1").unwrap_err();
        assert!(matches!(err, CoreError::Parameter(_, _)));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut group = detector_activity_params();
        group.set("length", "200").unwrap();
        group.set("baseinitaccum", "off").unwrap();
        group.reset_to_defaults();
        assert_eq!(group.get("length"), Some(&ParamValue::Int(98)));
        assert_eq!(group.get("baseinitaccum"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn every_builtin_group_starts_at_its_defaults() {
        for group in [
            detector_activity_params(),
            scheduler_params(),
            if_chain_params(),
            test_signal_params(),
            telescope_params(),
        ] {
            for param in group.params() {
                assert_eq!(param.value, param.default, "{}.{}", group.name(), param.name);
            }
        }
    }

    #[test]
    fn snapshot_round_trip_preserves_every_field() {
        let mut group = scheduler_params();
        group.set("beginfreq", "1420.5").unwrap();
        group.set("multitarget", "off").unwrap();

        let json = serde_json::to_string(&group).unwrap();
        let reloaded: ParameterGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, group);
    }

    #[test]
    fn show_lists_name_value_default_and_range() {
        let group = scheduler_params();
        let shown = group.show();
        assert!(shown.contains("maxspread = 50"));
        assert!(shown.contains("range [0, 1000]"));
    }
}

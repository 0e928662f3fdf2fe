use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// The closed set of remote component types the seeker manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComponentKind {
    Telescope,
    IfChain,
    TestSignal,
    Detector,
    Archiver,
    Channelizer,
    Control,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::Telescope,
        ComponentKind::IfChain,
        ComponentKind::TestSignal,
        ComponentKind::Detector,
        ComponentKind::Archiver,
        ComponentKind::Channelizer,
        ComponentKind::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Telescope => "tscope",
            ComponentKind::IfChain => "ifc",
            ComponentKind::TestSignal => "tsig",
            ComponentKind::Detector => "dx",
            ComponentKind::Archiver => "archiver",
            ComponentKind::Channelizer => "chan",
            ComponentKind::Control => "control",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tscope" => Ok(ComponentKind::Telescope),
            "ifc" => Ok(ComponentKind::IfChain),
            "tsig" => Ok(ComponentKind::TestSignal),
            "dx" => Ok(ComponentKind::Detector),
            "archiver" => Ok(ComponentKind::Archiver),
            "chan" => Ok(ComponentKind::Channelizer),
            "control" => Ok(ComponentKind::Control),
            other => Err(ModelError::UnknownComponentKind(other.to_string())),
        }
    }
}

/// Signal polarization as reported in detector status payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarization {
    Left,
    Right,
    Both,
    Mixed,
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Polarization::Left => "left",
            Polarization::Right => "right",
            Polarization::Both => "both",
            Polarization::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

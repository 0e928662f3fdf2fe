//! Core data model definitions shared across Seeker crates.
#![allow(missing_docs)]

pub mod band;
pub mod component;
pub mod error;
pub mod ids;
pub mod timestamp;

pub use band::FrequencyBand;
pub use component::{ComponentKind, Polarization};
pub use error::ModelError;
pub use ids::{ActivityId, BeamNumber, DetectorNumber, TargetId};
pub use timestamp::WireTimestamp;

//! Shared configuration library for Seeker.
//!
//! This crate centralizes config loading and validation plus the seeker's
//! command-line surface, so the server binary and the test harnesses share a
//! single source of truth for defaults and guard rails.

pub mod cli;
pub mod loader;
pub mod models;
pub mod validation;

pub use cli::SeekerArgs;
pub use loader::{load_config, ConfigLoadError};
pub use models::{
    ActivityConfig, DatabaseConfig, SchedulerConfig, SeekerConfig, ServerConfig,
    TopologyConfig,
};
pub use validation::{validate, ConfigViolation};

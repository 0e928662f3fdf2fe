use thiserror::Error;

pub type AppResult<T> = Result<T, ServerError>;

/// Failures surfaced by the server layer. Transport problems are contained
/// at the offending proxy; everything else propagates to the activity or to
/// startup.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("wire error: {0}")]
    Wire(#[from] seeker_contracts::WireError),

    #[error(transparent)]
    Core(#[from] seeker_core::CoreError),

    #[error("topology error: {0}")]
    Topology(#[from] seeker_core::TopologyError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("activity {activity_id} failed during {stage}: {reason}")]
    ActivityFailed {
        activity_id: seeker_model::ActivityId,
        stage: &'static str,
        reason: String,
    },

    #[error("invalid activity parameters: {0}")]
    InvalidParameters(String),

    #[error("component {0} is not connected")]
    ComponentUnavailable(String),
}

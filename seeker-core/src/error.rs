use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Recoverable failures surfaced by the domain layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("RFI mask: minimum mask element width is <= 0.0 ({0} MHz)")]
    NonPositiveMaskWidth(f64),

    #[error("RFI mask: negative signal frequency {0} MHz at index {1}")]
    NegativeSignalFrequency(f64, usize),

    #[error("RFI mask: signal frequency out of sorted order at index {0}")]
    UnsortedSignals(usize),

    #[error("observation range is empty")]
    EmptyObsRange,

    #[error("unknown merit factor: {0}")]
    UnknownMeritFactor(String),

    #[error("no target satisfies the selection constraints")]
    NoSuitableTarget,

    #[error("parameter {0}: {1}")]
    Parameter(String, String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

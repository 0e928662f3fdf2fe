use thiserror::Error;

/// Validation failures for model value types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("frequency band width must be positive, got {0} MHz")]
    NonPositiveBandWidth(f64),

    #[error("negative frequency: {0} MHz")]
    NegativeFrequency(f64),

    #[error("unknown component kind: {0}")]
    UnknownComponentKind(String),
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

/// Failures while framing, parsing, or interpreting component messages.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("declared body length {declared} exceeds maximum {max}")]
    OversizedBody { declared: u32, max: u32 },

    #[error("unknown message code: {0}")]
    UnknownMessageCode(u32),

    #[error("truncated {what}: needed {needed} bytes, had {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("invalid utf-8 in {field}")]
    InvalidText { field: &'static str },

    #[error("unexpected body for {code}: {detail}")]
    MalformedBody { code: &'static str, detail: String },
}

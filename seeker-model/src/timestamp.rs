use std::fmt;

#[cfg(feature = "chrono")]
use chrono::{DateTime, TimeZone, Utc};

/// Seconds + microseconds timestamp as carried in wire message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireTimestamp {
    pub secs: u32,
    pub micros: u32,
}

impl WireTimestamp {
    pub fn new(secs: u32, micros: u32) -> Self {
        Self { secs, micros }
    }

    #[cfg(feature = "chrono")]
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp().max(0) as u32,
            micros: now.timestamp_subsec_micros(),
        }
    }

    #[cfg(feature = "chrono")]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.secs), self.micros * 1000)
            .single()
    }
}

impl fmt::Display for WireTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

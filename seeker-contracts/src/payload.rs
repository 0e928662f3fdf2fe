use bytes::{Buf, BufMut, Bytes, BytesMut};
use seeker_model::{BeamNumber, ComponentKind, DetectorNumber, FrequencyBand};

use crate::error::WireError;

/// Component-reported problem severity, carried inside `Error` and `Message`
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Fatal = 3,
}

impl TryFrom<u8> for Severity {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Severity::Info),
            1 => Ok(Severity::Warning),
            2 => Ok(Severity::Error),
            3 => Ok(Severity::Fatal),
            other => Err(WireError::MalformedBody {
                code: "error",
                detail: format!("unknown severity {other}"),
            }),
        }
    }
}

/// Static identity a component reports once after connecting.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Intrinsics {
    pub kind: ComponentKind,
    pub name: String,
    pub interface_version: String,
    pub host: String,
    /// Channel bandwidth for detectors, tuning range for telescopes; free
    /// form for the rest.
    pub capabilities: String,
}

/// Dynamic state snapshot. The per-kind detail stays a rendered text block,
/// matching what the operator surface prints verbatim.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatusReport {
    pub kind: ComponentKind,
    pub name: String,
    pub detail: String,
}

/// A `ready` acknowledgment for a stage command.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReadyReport {
    pub name: String,
}

/// Typed component-reported error or informational message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComponentError {
    pub severity: Severity,
    pub code: u32,
    pub text: String,
}

/// Tuning order sent to one detector.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectorTuneOrder {
    pub detector: DetectorNumber,
    pub beam: BeamNumber,
    pub channel: i32,
    pub sky_freq_mhz: f64,
    pub bandwidth_mhz: f64,
}

/// One candidate narrowband signal found by a detector.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandidateSignal {
    pub freq_mhz: f64,
    pub drift_rate_hz_sec: f64,
    pub power: f64,
}

/// Body of a `dx candidate results` message: the signals one detector is
/// reporting for this observation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandidateReport {
    pub signals: Vec<CandidateSignal>,
}

// Bodies are packed big-endian with u16-length-prefixed UTF-8 strings, so a
// demarshal/marshal cycle is byte identical.

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut Bytes, field: &'static str) -> Result<String, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated {
            what: field,
            needed: 2,
            available: buf.remaining(),
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(WireError::Truncated {
            what: field,
            needed: len,
            available: buf.remaining(),
        });
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidText { field })
}

fn kind_tag(kind: ComponentKind) -> u8 {
    match kind {
        ComponentKind::Telescope => 0,
        ComponentKind::IfChain => 1,
        ComponentKind::TestSignal => 2,
        ComponentKind::Detector => 3,
        ComponentKind::Archiver => 4,
        ComponentKind::Channelizer => 5,
        ComponentKind::Control => 6,
    }
}

fn kind_from_tag(tag: u8) -> Result<ComponentKind, WireError> {
    match tag {
        0 => Ok(ComponentKind::Telescope),
        1 => Ok(ComponentKind::IfChain),
        2 => Ok(ComponentKind::TestSignal),
        3 => Ok(ComponentKind::Detector),
        4 => Ok(ComponentKind::Archiver),
        5 => Ok(ComponentKind::Channelizer),
        6 => Ok(ComponentKind::Control),
        other => Err(WireError::MalformedBody {
            code: "intrinsics",
            detail: format!("unknown component kind tag {other}"),
        }),
    }
}

impl Intrinsics {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(kind_tag(self.kind));
        put_str(&mut buf, &self.name);
        put_str(&mut buf, &self.interface_version);
        put_str(&mut buf, &self.host);
        put_str(&mut buf, &self.capabilities);
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        if body.remaining() < 1 {
            return Err(WireError::Truncated {
                what: "intrinsics kind",
                needed: 1,
                available: 0,
            });
        }
        let kind = kind_from_tag(body.get_u8())?;
        Ok(Self {
            kind,
            name: get_str(&mut body, "intrinsics name")?,
            interface_version: get_str(&mut body, "intrinsics version")?,
            host: get_str(&mut body, "intrinsics host")?,
            capabilities: get_str(&mut body, "intrinsics capabilities")?,
        })
    }
}

impl StatusReport {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(kind_tag(self.kind));
        put_str(&mut buf, &self.name);
        put_str(&mut buf, &self.detail);
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        if body.remaining() < 1 {
            return Err(WireError::Truncated {
                what: "status kind",
                needed: 1,
                available: 0,
            });
        }
        let kind = kind_from_tag(body.get_u8())?;
        Ok(Self {
            kind,
            name: get_str(&mut body, "status name")?,
            detail: get_str(&mut body, "status detail")?,
        })
    }
}

impl ReadyReport {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.name);
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        Ok(Self {
            name: get_str(&mut body, "ready name")?,
        })
    }
}

impl ComponentError {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.severity as u8);
        buf.put_u32(self.code);
        put_str(&mut buf, &self.text);
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        if body.remaining() < 5 {
            return Err(WireError::Truncated {
                what: "error body",
                needed: 5,
                available: body.remaining(),
            });
        }
        let severity = Severity::try_from(body.get_u8())?;
        let code = body.get_u32();
        Ok(Self {
            severity,
            code,
            text: get_str(&mut body, "error text")?,
        })
    }
}

impl DetectorTuneOrder {
    pub fn band(&self) -> Option<FrequencyBand> {
        FrequencyBand::new(self.sky_freq_mhz, self.bandwidth_mhz).ok()
    }

    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i32(self.detector.0);
        buf.put_i32(self.beam.0);
        buf.put_i32(self.channel);
        buf.put_f64(self.sky_freq_mhz);
        buf.put_f64(self.bandwidth_mhz);
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        const NEEDED: usize = 4 + 4 + 4 + 8 + 8;
        if body.remaining() < NEEDED {
            return Err(WireError::Truncated {
                what: "detector tune body",
                needed: NEEDED,
                available: body.remaining(),
            });
        }
        Ok(Self {
            detector: DetectorNumber(body.get_i32()),
            beam: BeamNumber(body.get_i32()),
            channel: body.get_i32(),
            sky_freq_mhz: body.get_f64(),
            bandwidth_mhz: body.get_f64(),
        })
    }
}

impl CandidateReport {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.signals.len() * 24);
        buf.put_u32(self.signals.len() as u32);
        for signal in &self.signals {
            buf.put_f64(signal.freq_mhz);
            buf.put_f64(signal.drift_rate_hz_sec);
            buf.put_f64(signal.power);
        }
        buf.freeze()
    }

    pub fn unpack(mut body: Bytes) -> Result<Self, WireError> {
        if body.remaining() < 4 {
            return Err(WireError::Truncated {
                what: "candidate count",
                needed: 4,
                available: body.remaining(),
            });
        }
        let count = body.get_u32() as usize;
        let needed = count * 24;
        if body.remaining() < needed {
            return Err(WireError::Truncated {
                what: "candidate signals",
                needed,
                available: body.remaining(),
            });
        }
        let mut signals = Vec::with_capacity(count);
        for _ in 0..count {
            signals.push(CandidateSignal {
                freq_mhz: body.get_f64(),
                drift_rate_hz_sec: body.get_f64(),
                power: body.get_f64(),
            });
        }
        Ok(Self { signals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_round_trip_is_byte_identical() {
        let intrin = Intrinsics {
            kind: ComponentKind::Detector,
            name: "dx7".into(),
            interface_version: "1.1".into(),
            host: "dxhost7".into(),
            capabilities: "bandwidth 2.1 MHz".into(),
        };
        let wire = intrin.pack();
        let decoded = Intrinsics::unpack(wire.clone()).unwrap();
        assert_eq!(decoded, intrin);
        assert_eq!(decoded.pack(), wire);
    }

    #[test]
    fn tune_order_round_trip_is_byte_identical() {
        let order = DetectorTuneOrder {
            detector: DetectorNumber(7),
            beam: BeamNumber(2),
            channel: 120,
            sky_freq_mhz: 1420.05,
            bandwidth_mhz: 2.1,
        };
        let wire = order.pack();
        let decoded = DetectorTuneOrder::unpack(wire.clone()).unwrap();
        assert_eq!(decoded, order);
        assert_eq!(decoded.pack(), wire);
    }

    #[test]
    fn candidate_report_round_trip_is_byte_identical() {
        let report = CandidateReport {
            signals: vec![
                CandidateSignal {
                    freq_mhz: 1420.001_3,
                    drift_rate_hz_sec: 0.11,
                    power: 14.5,
                },
                CandidateSignal {
                    freq_mhz: 1421.507_2,
                    drift_rate_hz_sec: -0.02,
                    power: 9.8,
                },
            ],
        };
        let wire = report.pack();
        let decoded = CandidateReport::unpack(wire.clone()).unwrap();
        assert_eq!(decoded, report);
        assert_eq!(decoded.pack(), wire);

        let empty = CandidateReport { signals: Vec::new() };
        assert_eq!(CandidateReport::unpack(empty.pack()).unwrap(), empty);
    }

    #[test]
    fn truncated_bodies_are_reported_not_panicked() {
        let order = DetectorTuneOrder {
            detector: DetectorNumber(1),
            beam: BeamNumber(1),
            channel: 0,
            sky_freq_mhz: 1.0,
            bandwidth_mhz: 1.0,
        };
        let mut wire = order.pack();
        let short = wire.split_to(10);
        assert!(matches!(
            DetectorTuneOrder::unpack(short),
            Err(WireError::Truncated { .. })
        ));
    }
}

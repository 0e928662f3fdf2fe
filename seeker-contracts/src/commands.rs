use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::MessageCode;

/// Terminator for the text-framed component dialects (IF chain, test signal
/// generator, component controller).
pub const TEXT_TERMINATOR: &str = "<end>";

fn text_body(rendered: String) -> Bytes {
    Bytes::from(format!("{rendered}\n{TEXT_TERMINATOR}\n"))
}

/// Commands the activity issues to the telescope.
#[derive(Debug, Clone, PartialEq)]
pub enum TelescopeCommand {
    Allocate { subarray: String },
    Deallocate { subarray: String },
    Point {
        subarray: String,
        ra2000_hours: f64,
        dec2000_deg: f64,
    },
    Tune {
        tuning_name: String,
        sky_freq_mhz: f64,
    },
    Stop,
    Stow,
    Wrap { number: i32 },
    Monitor { period_secs: i32 },
    Zfocus { sky_freq_mhz: f64 },
    LnaOn,
    PamSet,
    RequestPointCheck {
        subarray: String,
        ra2000_hours: f64,
        dec2000_deg: f64,
    },
    AntgroupAutoselect { bflist: String },
    BeamformerReset,
    BeamformerInit,
    BeamformerAutoatten,
    BeamformerSetCoords {
        beam: String,
        ra2000_hours: f64,
        dec2000_deg: f64,
    },
    BeamformerAddNull {
        beam: String,
        ra2000_hours: f64,
        dec2000_deg: f64,
    },
    BeamformerClearNulls,
    BeamformerPoint,
    BeamformerCal {
        cal_type: String,
        integrate_secs: i32,
        iterations: i32,
    },
}

impl TelescopeCommand {
    pub fn code(&self) -> MessageCode {
        use TelescopeCommand::*;
        match self {
            Allocate { .. } => MessageCode::TscopeAllocate,
            Deallocate { .. } => MessageCode::TscopeDeallocate,
            Point { .. } => MessageCode::TscopePoint,
            Tune { .. } => MessageCode::TscopeTune,
            Stop => MessageCode::Stop,
            Stow => MessageCode::TscopeStow,
            Wrap { .. } => MessageCode::TscopeWrap,
            Monitor { .. } => MessageCode::TscopeMonitor,
            Zfocus { .. } => MessageCode::TscopeZfocus,
            LnaOn => MessageCode::TscopeLnaOn,
            PamSet => MessageCode::TscopePamSet,
            RequestPointCheck { .. } => MessageCode::TscopeRequestPointCheck,
            AntgroupAutoselect { .. } => MessageCode::TscopeAntgroupAutoselect,
            BeamformerReset => MessageCode::TscopeBfReset,
            BeamformerInit => MessageCode::TscopeBfInit,
            BeamformerAutoatten => MessageCode::TscopeBfAutoatten,
            BeamformerSetCoords { .. } => MessageCode::TscopeBfSetCoords,
            BeamformerAddNull { .. } => MessageCode::TscopeBfAddNull,
            BeamformerClearNulls => MessageCode::TscopeBfClearNulls,
            BeamformerPoint => MessageCode::TscopeBfPoint,
            BeamformerCal { .. } => MessageCode::TscopeBfCal,
        }
    }

    /// Telescope bodies travel as rendered text; the backend server parses
    /// the same vocabulary the operator types.
    pub fn body(&self) -> Bytes {
        use TelescopeCommand::*;
        let mut s = String::new();
        match self {
            Allocate { subarray } => {
                let _ = write!(s, "ALLOCATE {subarray}");
            }
            Deallocate { subarray } => {
                let _ = write!(s, "DEALLOCATE {subarray}");
            }
            Point {
                subarray,
                ra2000_hours,
                dec2000_deg,
            } => {
                let _ = write!(
                    s,
                    "POINT {subarray} RAJ2000 {ra2000_hours:.6} DECJ2000 {dec2000_deg:.6}"
                );
            }
            Tune {
                tuning_name,
                sky_freq_mhz,
            } => {
                let _ = write!(s, "TUNE {tuning_name} {sky_freq_mhz:.6}");
            }
            Stop => s.push_str("STOP"),
            Stow => s.push_str("STOW"),
            Wrap { number } => {
                let _ = write!(s, "WRAP {number}");
            }
            Monitor { period_secs } => {
                let _ = write!(s, "MONITOR {period_secs}");
            }
            Zfocus { sky_freq_mhz } => {
                let _ = write!(s, "ZFOCUS {sky_freq_mhz:.6}");
            }
            LnaOn => s.push_str("LNA ON"),
            PamSet => s.push_str("PAM SET"),
            RequestPointCheck {
                subarray,
                ra2000_hours,
                dec2000_deg,
            } => {
                let _ = write!(
                    s,
                    "POINTCHECK {subarray} RAJ2000 {ra2000_hours:.6} DECJ2000 {dec2000_deg:.6}"
                );
            }
            AntgroupAutoselect { bflist } => {
                let _ = write!(s, "ANTGROUP AUTOSELECT {bflist}");
            }
            BeamformerReset => s.push_str("BF RESET"),
            BeamformerInit => s.push_str("BF INIT"),
            BeamformerAutoatten => s.push_str("BF AUTOATTEN"),
            BeamformerSetCoords {
                beam,
                ra2000_hours,
                dec2000_deg,
            } => {
                let _ = write!(
                    s,
                    "BF SET COORDS {beam} RAJ2000 {ra2000_hours:.6} DECJ2000 {dec2000_deg:.6}"
                );
            }
            BeamformerAddNull {
                beam,
                ra2000_hours,
                dec2000_deg,
            } => {
                let _ = write!(
                    s,
                    "BF ADD NULL {beam} RAJ2000 {ra2000_hours:.6} DECJ2000 {dec2000_deg:.6}"
                );
            }
            BeamformerClearNulls => s.push_str("BF CLEAR NULLS"),
            BeamformerPoint => s.push_str("BF POINT"),
            BeamformerCal {
                cal_type,
                integrate_secs,
                iterations,
            } => {
                let _ = write!(
                    s,
                    "BF CAL {cal_type} INTEGRATE {integrate_secs} CYCLES {iterations}"
                );
            }
        }
        Bytes::from(s)
    }
}

/// Text-framed IF chain commands, terminated by `<end>`.
#[derive(Debug, Clone, PartialEq)]
pub enum IfChainCommand {
    Attn { left_db: i32, right_db: i32 },
    IfSource { source: String },
    Off,
    StxStart,
    StxVariance { left: f64, right: f64 },
}

impl IfChainCommand {
    pub fn render(&self) -> Bytes {
        use IfChainCommand::*;
        let line = match self {
            Attn { left_db, right_db } => format!("attn {left_db} {right_db}"),
            IfSource { source } => format!("ifsource {source}"),
            Off => "off".to_string(),
            StxStart => "stxstart".to_string(),
            StxVariance { left, right } => format!("stxvariance {left:.3} {right:.3}"),
        };
        text_body(line)
    }
}

/// Text-framed test signal generator commands.
#[derive(Debug, Clone, PartialEq)]
pub enum TestSignalCommand {
    TuneSigGen {
        freq_mhz: f64,
        amp_dbm: f64,
        drift_rate_hz_sec: f64,
        duration_secs: f64,
    },
    Pulse {
        amp_dbm: f64,
        period_secs: f64,
        width_secs: f64,
    },
    On,
    Off,
    Quiet,
    Reset,
}

impl TestSignalCommand {
    pub fn render(&self) -> Bytes {
        use TestSignalCommand::*;
        let line = match self {
            TuneSigGen {
                freq_mhz,
                amp_dbm,
                drift_rate_hz_sec,
                duration_secs,
            } => format!(
                "tsig tunesiggen {freq_mhz:.6} {amp_dbm:.3} {drift_rate_hz_sec:.3} {duration_secs:.3}"
            ),
            Pulse {
                amp_dbm,
                period_secs,
                width_secs,
            } => format!("tsig pulse {amp_dbm:.3} {period_secs:.3} {width_secs:.3}"),
            On => "tsig on".to_string(),
            Off => "tsig off".to_string(),
            Quiet => "tsig quiet".to_string(),
            Reset => "tsig reset".to_string(),
        };
        text_body(line)
    }
}

/// Binary-framed detector control commands; bodies are built by the caller
/// from the typed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorCommand {
    Tune,
    StartTime,
    FollowUpCandidates,
    ResolveCandidates,
    RecentRfiMask,
    Stop,
    Shutdown,
}

impl DetectorCommand {
    pub fn code(&self) -> MessageCode {
        match self {
            DetectorCommand::Tune => MessageCode::DetectorTune,
            DetectorCommand::StartTime => MessageCode::DetectorStartTime,
            DetectorCommand::FollowUpCandidates => MessageCode::DetectorFollowUpCandidates,
            DetectorCommand::ResolveCandidates => MessageCode::DetectorResolveCandidates,
            DetectorCommand::RecentRfiMask => MessageCode::DetectorRecentRfiMask,
            DetectorCommand::Stop => MessageCode::Stop,
            DetectorCommand::Shutdown => MessageCode::Shutdown,
        }
    }
}

/// Binary-framed channelizer control.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelizerCommand {
    Start {
        start_secs: u32,
        center_sky_freq_mhz: f64,
    },
    Stop,
}

impl ChannelizerCommand {
    pub fn code(&self) -> MessageCode {
        match self {
            ChannelizerCommand::Start { .. } => MessageCode::ChannelizerStart,
            ChannelizerCommand::Stop => MessageCode::ChannelizerStop,
        }
    }

    pub fn body(&self) -> Bytes {
        match self {
            ChannelizerCommand::Start {
                start_secs,
                center_sky_freq_mhz,
            } => {
                let mut buf = BytesMut::with_capacity(12);
                buf.put_u32(*start_secs);
                buf.put_f64(*center_sky_freq_mhz);
                buf.freeze()
            }
            ChannelizerCommand::Stop => Bytes::new(),
        }
    }
}

/// Component controller text dialect: lifecycle of managed components by
/// name.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Start { component: String },
    Shutdown { component: String },
    Restart { component: String },
}

impl ControlCommand {
    pub fn render(&self) -> Bytes {
        let line = match self {
            ControlCommand::Start { component } => format!("start {component}"),
            ControlCommand::Shutdown { component } => format!("shutdown {component}"),
            ControlCommand::Restart { component } => format!("restart {component}"),
        };
        text_body(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_dialects_are_end_terminated() {
        let rendered = IfChainCommand::Attn {
            left_db: 6,
            right_db: 8,
        }
        .render();
        let text = std::str::from_utf8(&rendered).unwrap();
        assert!(text.starts_with("attn 6 8\n"));
        assert!(text.ends_with("<end>\n"));

        let rendered = TestSignalCommand::TuneSigGen {
            freq_mhz: 1420.123456,
            amp_dbm: -20.0,
            drift_rate_hz_sec: 0.1,
            duration_secs: 98.0,
        }
        .render();
        let text = std::str::from_utf8(&rendered).unwrap();
        assert!(text.contains("tsig tunesiggen 1420.123456"));
        assert!(text.ends_with("<end>\n"));
    }

    #[test]
    fn channelizer_commands_carry_code_and_body() {
        let start = ChannelizerCommand::Start {
            start_secs: 1_254_870_056,
            center_sky_freq_mhz: 1420.0,
        };
        assert_eq!(start.code(), MessageCode::ChannelizerStart);
        assert_eq!(start.body().len(), 12);

        let stop = ChannelizerCommand::Stop;
        assert_eq!(stop.code(), MessageCode::ChannelizerStop);
        assert!(stop.body().is_empty());
    }

    #[test]
    fn telescope_commands_map_to_their_codes() {
        assert_eq!(
            TelescopeCommand::BeamformerCal {
                cal_type: "delay".into(),
                integrate_secs: 10,
                iterations: 2,
            }
            .code(),
            MessageCode::TscopeBfCal
        );
        assert_eq!(TelescopeCommand::Stop.code(), MessageCode::Stop);
    }
}

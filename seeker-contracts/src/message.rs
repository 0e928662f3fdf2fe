use std::fmt;

use crate::error::WireError;

/// Wire message codes shared by the seeker and every component kind.
///
/// Codes are partitioned into ranges per component family so a stray frame
/// from a mis-wired component is recognizable in the log. The `Display`
/// strings are the canonical translations used on every log line; raw
/// integers never appear in operator-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageCode {
    // Common lifecycle (1..)
    RequestIntrinsics = 1,
    Intrinsics = 2,
    RequestStatus = 3,
    Status = 4,
    Ready = 5,
    Error = 6,
    Message = 7,
    Shutdown = 8,
    Stop = 9,
    Started = 10,

    // Telescope (100..)
    TscopeAllocate = 100,
    TscopeDeallocate = 101,
    TscopePoint = 102,
    TscopeTune = 103,
    TscopeStow = 104,
    TscopeWrap = 105,
    TscopeMonitor = 106,
    TscopeZfocus = 107,
    TscopeLnaOn = 108,
    TscopePamSet = 109,
    TscopeRequestPointCheck = 110,
    TscopeAntgroupAutoselect = 111,
    TscopeBfReset = 112,
    TscopeBfInit = 113,
    TscopeBfAutoatten = 114,
    TscopeBfSetCoords = 115,
    TscopeBfAddNull = 116,
    TscopeBfClearNulls = 117,
    TscopeBfPoint = 118,
    TscopeBfCal = 119,
    TscopeTrackingOn = 120,
    TscopeTrackingOff = 121,
    TscopeStatusMultibeam = 122,

    // Detector (200..)
    DetectorTune = 200,
    DetectorStartTime = 201,
    DetectorDataCollectionStarted = 202,
    DetectorDataCollectionComplete = 203,
    DetectorSignalDetectionStarted = 204,
    DetectorSignalDetectionComplete = 205,
    DetectorCandidateResults = 206,
    DetectorDoneSendingCandidateResults = 207,
    DetectorFollowUpCandidates = 208,
    DetectorResolveCandidates = 209,
    DetectorRecentRfiMask = 210,
    DetectorActivityComplete = 211,
    DetectorTuned = 212,

    // Channelizer (300..)
    ChannelizerStarted = 300,
    ChannelizerStopped = 301,
    ChannelizerStart = 302,
    ChannelizerStop = 303,

    // Archiver (400..)
    ArchiverArchiveSignal = 400,
    ArchiverDiscardSignal = 401,
}

impl MessageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCode::RequestIntrinsics => "request intrinsics",
            MessageCode::Intrinsics => "intrinsics",
            MessageCode::RequestStatus => "request status",
            MessageCode::Status => "status",
            MessageCode::Ready => "ready",
            MessageCode::Error => "error",
            MessageCode::Message => "message",
            MessageCode::Shutdown => "shutdown",
            MessageCode::Stop => "stop",
            MessageCode::Started => "started",
            MessageCode::TscopeAllocate => "tscope allocate",
            MessageCode::TscopeDeallocate => "tscope deallocate",
            MessageCode::TscopePoint => "tscope point subarray",
            MessageCode::TscopeTune => "tscope tune",
            MessageCode::TscopeStow => "tscope stow",
            MessageCode::TscopeWrap => "tscope wrap",
            MessageCode::TscopeMonitor => "tscope monitor",
            MessageCode::TscopeZfocus => "tscope zfocus",
            MessageCode::TscopeLnaOn => "tscope lna on",
            MessageCode::TscopePamSet => "tscope pam set",
            MessageCode::TscopeRequestPointCheck => "tscope request point check",
            MessageCode::TscopeAntgroupAutoselect => "tscope antgroup autoselect",
            MessageCode::TscopeBfReset => "tscope bf reset",
            MessageCode::TscopeBfInit => "tscope bf init",
            MessageCode::TscopeBfAutoatten => "tscope bf autoatten",
            MessageCode::TscopeBfSetCoords => "tscope bf set coords",
            MessageCode::TscopeBfAddNull => "tscope bf add null",
            MessageCode::TscopeBfClearNulls => "tscope bf clear nulls",
            MessageCode::TscopeBfPoint => "tscope bf point",
            MessageCode::TscopeBfCal => "tscope bf cal",
            MessageCode::TscopeTrackingOn => "tscope tracking on",
            MessageCode::TscopeTrackingOff => "tscope tracking off",
            MessageCode::TscopeStatusMultibeam => "tscope status multibeam",
            MessageCode::DetectorTune => "dx tune",
            MessageCode::DetectorStartTime => "dx start time",
            MessageCode::DetectorDataCollectionStarted => "dx data collection started",
            MessageCode::DetectorDataCollectionComplete => "dx data collection complete",
            MessageCode::DetectorSignalDetectionStarted => "dx signal detection started",
            MessageCode::DetectorSignalDetectionComplete => "dx signal detection complete",
            MessageCode::DetectorCandidateResults => "dx candidate results",
            MessageCode::DetectorDoneSendingCandidateResults => {
                "dx done sending candidate results"
            }
            MessageCode::DetectorFollowUpCandidates => "dx follow up candidates",
            MessageCode::DetectorResolveCandidates => "dx resolve candidates",
            MessageCode::DetectorRecentRfiMask => "dx recent rfi mask",
            MessageCode::DetectorActivityComplete => "dx activity complete",
            MessageCode::DetectorTuned => "dx tuned",
            MessageCode::ChannelizerStarted => "channelizer started",
            MessageCode::ChannelizerStopped => "channelizer stopped",
            MessageCode::ChannelizerStart => "channelizer start",
            MessageCode::ChannelizerStop => "channelizer stop",
            MessageCode::ArchiverArchiveSignal => "archiver archive signal",
            MessageCode::ArchiverDiscardSignal => "archiver discard signal",
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u32> for MessageCode {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, WireError> {
        use MessageCode::*;
        let code = match value {
            1 => RequestIntrinsics,
            2 => Intrinsics,
            3 => RequestStatus,
            4 => Status,
            5 => Ready,
            6 => Error,
            7 => Message,
            8 => Shutdown,
            9 => Stop,
            10 => Started,
            100 => TscopeAllocate,
            101 => TscopeDeallocate,
            102 => TscopePoint,
            103 => TscopeTune,
            104 => TscopeStow,
            105 => TscopeWrap,
            106 => TscopeMonitor,
            107 => TscopeZfocus,
            108 => TscopeLnaOn,
            109 => TscopePamSet,
            110 => TscopeRequestPointCheck,
            111 => TscopeAntgroupAutoselect,
            112 => TscopeBfReset,
            113 => TscopeBfInit,
            114 => TscopeBfAutoatten,
            115 => TscopeBfSetCoords,
            116 => TscopeBfAddNull,
            117 => TscopeBfClearNulls,
            118 => TscopeBfPoint,
            119 => TscopeBfCal,
            120 => TscopeTrackingOn,
            121 => TscopeTrackingOff,
            122 => TscopeStatusMultibeam,
            200 => DetectorTune,
            201 => DetectorStartTime,
            202 => DetectorDataCollectionStarted,
            203 => DetectorDataCollectionComplete,
            204 => DetectorSignalDetectionStarted,
            205 => DetectorSignalDetectionComplete,
            206 => DetectorCandidateResults,
            207 => DetectorDoneSendingCandidateResults,
            208 => DetectorFollowUpCandidates,
            209 => DetectorResolveCandidates,
            210 => DetectorRecentRfiMask,
            211 => DetectorActivityComplete,
            212 => DetectorTuned,
            300 => ChannelizerStarted,
            301 => ChannelizerStopped,
            302 => ChannelizerStart,
            303 => ChannelizerStop,
            400 => ArchiverArchiveSignal,
            401 => ArchiverDiscardSignal,
            other => return Err(WireError::UnknownMessageCode(other)),
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_survives_a_u32_round_trip() {
        let codes = [
            MessageCode::RequestIntrinsics,
            MessageCode::Intrinsics,
            MessageCode::Status,
            MessageCode::Ready,
            MessageCode::Error,
            MessageCode::TscopeAllocate,
            MessageCode::TscopeStatusMultibeam,
            MessageCode::DetectorTune,
            MessageCode::DetectorDoneSendingCandidateResults,
            MessageCode::ChannelizerStarted,
            MessageCode::ArchiverDiscardSignal,
        ];
        for code in codes {
            assert_eq!(MessageCode::try_from(code as u32).unwrap(), code);
        }
    }

    #[test]
    fn unknown_codes_are_typed_errors() {
        assert!(matches!(
            MessageCode::try_from(99_999),
            Err(WireError::UnknownMessageCode(99_999))
        ));
    }

    #[test]
    fn code_strings_never_fall_back_to_integers() {
        assert_eq!(MessageCode::TscopeBfCal.to_string(), "tscope bf cal");
        assert_eq!(
            MessageCode::DetectorRecentRfiMask.to_string(),
            "dx recent rfi mask"
        );
    }
}

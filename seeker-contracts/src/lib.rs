//! Wire protocol and component contracts for the Seeker control plane.
//!
//! Every remote hardware component speaks a framed stream of
//! `(code, activity id, message number, timestamp, body length)` headers
//! followed by a typed body. This crate owns the header layout, the framing
//! codec, the message-code vocabulary, the typed payloads the seeker consumes,
//! and the capability trait each component proxy implements.
#![allow(missing_docs)]

pub mod codec;
pub mod commands;
pub mod contract;
pub mod error;
pub mod header;
pub mod message;
pub mod payload;

pub use codec::{FrameCodec, InboundFrame, OutboundFrame};
pub use commands::{
    ChannelizerCommand, ControlCommand, DetectorCommand, IfChainCommand,
    TelescopeCommand, TestSignalCommand,
};
pub use contract::ComponentContract;
pub use error::WireError;
pub use header::{MessageHeader, HEADER_LEN, MAX_BODY_BYTES};
pub use message::MessageCode;
pub use payload::{
    CandidateReport, CandidateSignal, ComponentError, DetectorTuneOrder,
    Intrinsics, ReadyReport, Severity, StatusReport,
};

use async_trait::async_trait;
use bytes::Bytes;
use seeker_model::ActivityId;

use crate::error::WireError;
use crate::message::MessageCode;
use crate::payload::{Intrinsics, StatusReport};

/// Capability set every remote component presents to the seeker.
///
/// The generic component manager is parameterized over this trait rather
/// than a concrete proxy type, so registries, allocation, and the intrinsics
/// handshake are written once for all hardware kinds.
#[async_trait]
pub trait ComponentContract: Send + Sync {
    /// Component name as reported in intrinsics; empty until the handshake
    /// completes.
    fn name(&self) -> String;

    /// Hostname of the remote peer, for log lines.
    fn remote_host(&self) -> String;

    /// Most recent intrinsics snapshot, if the handshake completed.
    fn cached_intrinsics(&self) -> Option<Intrinsics>;

    /// Most recent status snapshot.
    fn cached_status(&self) -> Option<StatusReport>;

    /// True when the reported interface version matches what this build
    /// expects.
    fn valid_interface_version(&self) -> bool;

    /// Ask the component to send its intrinsics.
    async fn request_intrinsics(&self) -> Result<(), WireError>;

    /// Ask the component for a fresh status report.
    async fn request_status(&self) -> Result<(), WireError>;

    /// Send an arbitrary framed command.
    async fn send_command(
        &self,
        code: MessageCode,
        activity_id: ActivityId,
        body: Bytes,
    ) -> Result<(), WireError>;

    /// Ask the component to exit, then drop the connection.
    async fn shutdown(&self);

    /// Drop the connection without ceremony, e.g. after a version mismatch.
    async fn reset_socket(&self);
}

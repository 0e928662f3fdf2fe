//! Events that drive the activity state machine. Proxy callbacks, stage
//! watchdogs, and stop requests all arrive on one queue, so the machine
//! advances on a single task.

use bytes::Bytes;
use seeker_contracts::ComponentError;
use seeker_model::{ActivityId, ComponentKind};
use tokio::sync::mpsc;

use super::Stage;

/// Everything that can advance (or abort) an activity.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ComponentReady { kind: ComponentKind, name: String },
    DetectorTuned { name: String },
    DataCollectionStarted { name: String },
    DataCollectionComplete { name: String },
    SignalDetectionStarted { name: String },
    SignalDetectionComplete { name: String },
    CandidateResults { name: String, body: Bytes },
    DoneSendingCandidateResults { name: String },
    ActivityUnitComplete { name: String },
    ComponentDisconnected { kind: ComponentKind, name: String },
    ComponentMessage {
        kind: ComponentKind,
        name: String,
        error: ComponentError,
    },
    StageTimeout(Stage),
    Stop,
}

/// Non-owning reference a proxy holds to its attached activity; dropping
/// the activity closes the queue and the reference goes stale harmlessly.
#[derive(Debug, Clone)]
pub struct ActivityHandle {
    pub activity_id: ActivityId,
    pub events: mpsc::UnboundedSender<ActivityEvent>,
}

impl ActivityHandle {
    /// Request cooperative termination. Safe to call any number of times
    /// from any task.
    pub fn stop(&self) {
        let _ = self.events.send(ActivityEvent::Stop);
    }
}

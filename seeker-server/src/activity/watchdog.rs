//! Stage watchdog timers.
//!
//! Each stage arms a watchdog before suspending on component callbacks; the
//! expiry posts onto the activity's event queue like any other event, so
//! timer handling and callback handling cannot race.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::ActivityEvent;
use super::Stage;

/// One-shot timer posting a stage timeout onto the activity event queue.
#[derive(Debug, Default)]
pub struct Watchdog {
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the watchdog for a stage. A previously armed timer
    /// is cancelled first.
    pub fn arm(
        &mut self,
        stage: Stage,
        wait: Duration,
        events: mpsc::UnboundedSender<ActivityEvent>,
    ) {
        self.cancel();
        debug!(?stage, ?wait, "arming stage watchdog");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = events.send(ActivityEvent::StageTimeout(stage));
        }));
    }

    /// Cancel without firing. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry_posts_a_stage_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new();
        watchdog.arm(Stage::Collect, Duration::from_millis(5), tx);

        match rx.recv().await {
            Some(ActivityEvent::StageTimeout(Stage::Collect)) => {}
            other => panic!("expected a Collect timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_suppresses_the_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new();
        watchdog.arm(Stage::Detect, Duration::from_millis(20), tx);
        watchdog.cancel();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rearming_replaces_the_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watchdog = Watchdog::new();
        watchdog.arm(Stage::Collect, Duration::from_secs(60), tx.clone());
        watchdog.arm(Stage::Report, Duration::from_millis(5), tx);

        match rx.recv().await {
            Some(ActivityEvent::StageTimeout(Stage::Report)) => {}
            other => panic!("expected a Report timeout, got {other:?}"),
        }
    }
}

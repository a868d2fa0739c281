//! Progress reporting for capture sessions.
//!
//! Status flows one way, from the session to any number of observers, over a `watch` channel:
//! a slow observer never applies backpressure to the sampling loop, it simply sees the latest
//! status when it next looks. Updates are clamped so that `current_time_ms` and `total_frames`
//! never decrease within a session.

use tokio::sync::watch;

/// Progress snapshot of a running capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    /// `false` only in the final status of a session.
    pub is_recording: bool,
    /// Percent of the configured duration covered, `0.0..=100.0`.
    pub progress: f32,
    /// Captured time in milliseconds.
    #[serde(rename = "currentTime")]
    pub current_time_ms: u64,
    /// Frames covered so far.
    pub total_frames: u64,
}

/// Synchronous observer, invoked in publish order on the session task.
pub type StatusCallback = Box<dyn FnMut(&RecordingStatus) + Send>;

/// Publishing half, owned by a capture session.
pub struct StatusSender {
    tx: watch::Sender<RecordingStatus>,
    callback: Option<StatusCallback>,
    last: RecordingStatus,
}

/// Observing half handed to the caller of `start_recording`.
#[derive(Clone, Debug)]
pub struct StatusReceiver {
    rx: watch::Receiver<RecordingStatus>,
}

/// Create a status channel, optionally with a synchronous callback.
pub fn status_channel(callback: Option<StatusCallback>) -> (StatusSender, StatusReceiver) {
    let (tx, rx) = watch::channel(RecordingStatus::default());
    (
        StatusSender {
            tx,
            callback,
            last: RecordingStatus::default(),
        },
        StatusReceiver { rx },
    )
}

impl StatusSender {
    /// Publish a status, clamped to be non-decreasing relative to the previous one.
    pub fn publish(&mut self, status: RecordingStatus) {
        let status = RecordingStatus {
            is_recording: status.is_recording,
            progress: status.progress.clamp(0.0, 100.0).max(self.last.progress),
            current_time_ms: status.current_time_ms.max(self.last.current_time_ms),
            total_frames: status.total_frames.max(self.last.total_frames),
        };
        self.last = status;
        if let Some(cb) = self.callback.as_mut() {
            cb(&status);
        }
        // No receivers left is fine; the session keeps running.
        let _ = self.tx.send(status);
    }

    /// Publish the terminal `is_recording: false` status, keeping the last counters.
    pub fn finish(&mut self) {
        let last = self.last;
        self.publish(RecordingStatus {
            is_recording: false,
            ..last
        });
    }

    /// Last published status.
    pub fn last(&self) -> RecordingStatus {
        self.last
    }
}

impl StatusReceiver {
    /// Latest published status.
    pub fn current(&self) -> RecordingStatus {
        *self.rx.borrow()
    }

    /// Wait for the next status. `None` once the session is gone and the final status was seen.
    pub async fn next(&mut self) -> Option<RecordingStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

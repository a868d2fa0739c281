//! Capture orchestration: one bounded session from preparation to a resolved result.
//!
//! ```text
//! Idle -> Preparing -> Recording -> Finalizing -> Completed | Failed -> Idle
//! ```
//!
//! Recording ends on whichever comes first: the strategy covering the configured duration, an
//! explicit stop, or the timeout guard (`duration + safety margin`). The guard covers finalizing
//! too. Every exit path tears down the strategy, its encoder and the sampling timer, and waits for
//! that teardown, before the result is produced.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::binding::{SharedEngine, lock_engine};
use crate::config::{CaptureOptions, RecordingConfig};
use crate::encode::sink::SinkConfig;
use crate::foundation::error::{CaptureError, CaptureResult, ErrorKind};
use crate::result::RecordingResult;
use crate::source::{FrameSource, SinkFactory, select_source};
use crate::status::{RecordingStatus, StatusSender};
use crate::surface::SurfaceHandle;

/// Process-wide "one capture at a time" flag, shared by every holder of an engine.
#[derive(Clone, Debug, Default)]
pub struct SessionLock {
    held: Arc<AtomicBool>,
}

impl SessionLock {
    /// Take the lock, or `None` when a session already holds it.
    pub fn try_acquire(&self) -> Option<SessionGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionGuard {
                held: self.held.clone(),
            })
    }

    /// Whether some session currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the [`SessionLock`] on drop, including during unwinding.
#[derive(Debug)]
pub struct SessionGuard {
    held: Arc<AtomicBool>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Lifecycle position of the capture orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CaptureState {
    /// No session, or the last one has been cleaned up.
    #[default]
    Idle,
    /// Locating the surface and rewinding the engine.
    Preparing,
    /// Sampling frames.
    Recording,
    /// Sealing the encoder.
    Finalizing,
    /// Output is ready; about to return to `Idle`.
    Completed,
    /// The session ended with an error; about to return to `Idle`.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopReason {
    DurationReached,
    Requested,
}

pub(crate) struct CaptureSession {
    config: RecordingConfig,
    engine: SharedEngine,
    options: CaptureOptions,
    sinks: Arc<dyn SinkFactory>,
    status: StatusSender,
    state: Arc<watch::Sender<CaptureState>>,
    stop: watch::Receiver<bool>,
    elapsed_ms: u64,
}

impl CaptureSession {
    pub(crate) fn new(
        config: RecordingConfig,
        engine: SharedEngine,
        options: CaptureOptions,
        sinks: Arc<dyn SinkFactory>,
        status: StatusSender,
        state: Arc<watch::Sender<CaptureState>>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            engine,
            options,
            sinks,
            status,
            state,
            stop,
            elapsed_ms: 0,
        }
    }

    fn set_state(&self, next: CaptureState) {
        let prev = self.state.send_replace(next);
        tracing::debug!(?prev, ?next, "capture state");
    }

    /// Drive the session to a result. Consumes the session so nothing outlives it.
    #[tracing::instrument(
        name = "capture",
        skip_all,
        fields(export_id = %self.config.export_id, format = %self.config.format)
    )]
    pub(crate) async fn run(mut self) -> RecordingResult {
        let format = self.config.format;
        let outcome = match self.prepare() {
            Ok(surface) => {
                let deadline =
                    Instant::now() + self.config.duration() + self.options.safety_margin;
                self.record(surface, deadline).await
            }
            Err(e) => Err(e),
        };

        self.status.finish();
        match outcome {
            Ok(data) => {
                self.set_state(CaptureState::Completed);
                tracing::info!(
                    bytes = data.len(),
                    duration_ms = self.elapsed_ms,
                    "capture completed"
                );
                RecordingResult::completed(format, data, self.elapsed_ms)
            }
            Err(e) => {
                self.set_state(CaptureState::Failed);
                tracing::error!(error = %e, "capture failed");
                RecordingResult::failed(format, &e, self.elapsed_ms)
            }
        }
    }

    /// Locate the surface and put the engine at time 0, applying any queued resolution change.
    fn prepare(&mut self) -> CaptureResult<SurfaceHandle> {
        self.set_state(CaptureState::Preparing);
        let mut engine = lock_engine(&self.engine)?;
        if engine.apply_pending()? {
            tracing::debug!("applied queued resolution change before capture");
        }
        let surface = engine
            .surface()
            .ok_or_else(|| CaptureError::surface_not_found("no rendering surface is attached"))?;
        engine.pause();
        engine.stop();
        Ok(surface)
    }

    fn play(&self) -> CaptureResult<()> {
        lock_engine(&self.engine)?.play()
    }

    fn timeout_error(&self) -> CaptureError {
        CaptureError::timeout(format!(
            "no result within {} ms (duration {} ms + {} ms margin)",
            (self.config.duration() + self.options.safety_margin).as_millis(),
            self.config.duration_ms,
            self.options.safety_margin.as_millis()
        ))
    }

    async fn record(
        &mut self,
        surface: SurfaceHandle,
        deadline: Instant,
    ) -> CaptureResult<Vec<u8>> {
        let mut source = select_source(&self.config, self.sinks.as_ref(), &self.options);
        let sink_cfg = SinkConfig {
            resolution: self.config.output_resolution(surface.resolution()),
            fps: self.config.fps,
            format: self.config.format,
            quality: self.config.quality,
            bitrate: self.config.bitrate,
            bg_rgba: self.options.bg_rgba,
        };
        source.start(sink_cfg, Instant::now())?;
        self.set_state(CaptureState::Recording);
        tracing::info!(
            selector = surface.selector(),
            duration_ms = self.config.duration_ms,
            fps = self.config.fps,
            strategy = ?source.kind(),
            "capture started"
        );

        let sampled = if source.play_on_first_tick() {
            Ok(())
        } else {
            self.play()
        };
        let sampled = match sampled {
            Ok(()) => tokio::time::timeout_at(deadline, self.sample(&surface, source.as_mut()))
                .await
                .unwrap_or_else(|_| Err(self.timeout_error())),
            Err(e) => Err(e),
        };
        let reason = match sampled {
            Ok(reason) => reason,
            Err(e) => {
                source.abort().cancel().await;
                return Err(e);
            }
        };

        self.set_state(CaptureState::Finalizing);
        let now = Instant::now();
        let progress = source.progress(now);
        self.elapsed_ms = progress.elapsed_ms;
        tracing::debug!(?reason, frames = progress.frames, "finalizing");
        match source.finalize(now).join_until(deadline).await {
            Some(encoded) => encoded,
            None => Err(self.timeout_error()),
        }
    }

    /// The sampling loop. Returns why it stopped; errors are fatal to the session.
    async fn sample(
        &mut self,
        surface: &SurfaceHandle,
        source: &mut dyn FrameSource,
    ) -> CaptureResult<StopReason> {
        let mut interval = tokio::time::interval(self.config.frame_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first_tick = true;
        let mut consecutive_failures = 0u32;
        let duration_ms = f64::from(self.config.duration_ms);

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return Ok(StopReason::Requested),
                _ = interval.tick() => {}
            }

            if first_tick {
                first_tick = false;
                if source.play_on_first_tick() {
                    self.play()?;
                }
            }

            let sampled = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return Ok(StopReason::Requested),
                frame = surface.capture_frame() => frame,
            };
            let fed = sampled.and_then(|frame| source.feed(&frame, Instant::now()));
            match fed {
                Ok(()) => consecutive_failures = 0,
                Err(e) if e.kind() == ErrorKind::FrameCapture => {
                    source.skip(Instant::now())?;
                    consecutive_failures += 1;
                    tracing::warn!(consecutive_failures, error = %e, "frame capture failed");
                    if consecutive_failures >= self.options.max_consecutive_failures {
                        return Err(CaptureError::frame_capture(format!(
                            "{consecutive_failures} consecutive frame captures failed, last: {e}"
                        )));
                    }
                }
                Err(e) => return Err(e),
            }

            let progress = source.progress(Instant::now());
            self.elapsed_ms = progress.elapsed_ms;
            self.status.publish(RecordingStatus {
                is_recording: true,
                progress: (progress.elapsed_ms as f64 / duration_ms * 100.0).min(100.0) as f32,
                current_time_ms: progress.elapsed_ms,
                total_frames: progress.frames,
            });
            if progress.done {
                return Ok(StopReason::DurationReached);
            }
        }
    }
}

/// Resolves once a stop was requested or the requesting side is gone.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_admits_one_holder_and_releases_on_drop() {
        let lock = SessionLock::default();
        let guard = lock.try_acquire().expect("first acquire");
        assert!(lock.is_held());
        assert!(lock.clone().try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }
}

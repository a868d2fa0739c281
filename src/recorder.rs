//! Public recording surface: a registry of at most one in-flight capture per engine.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};

use crate::binding::{SharedEngine, lock_engine};
use crate::config::{CaptureOptions, OutputFormat, RecordingConfig};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::result::{RecordingResult, ResultSlot};
use crate::session::{CaptureSession, CaptureState, SessionLock};
use crate::source::{DefaultSinks, SinkFactory};
use crate::status::{StatusCallback, StatusReceiver, status_channel};

/// Entry point for starting, stopping and inspecting captures.
///
/// Cheap to clone; clones share the same registry. Sessions run on the ambient tokio runtime.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

struct Inner {
    engine: SharedEngine,
    lock: SessionLock,
    options: CaptureOptions,
    sinks: Arc<dyn SinkFactory>,
    active_stop: Mutex<Option<watch::Sender<bool>>>,
    last_result: Mutex<Option<RecordingResult>>,
    state: Arc<watch::Sender<CaptureState>>,
}

/// Caller's view of one started recording.
#[derive(Debug)]
pub struct RecordingHandle {
    status: StatusReceiver,
    result: oneshot::Receiver<RecordingResult>,
    format: OutputFormat,
}

impl RecordingHandle {
    fn resolved(status: StatusReceiver, format: OutputFormat, result: RecordingResult) -> Self {
        let (mut slot, rx) = ResultSlot::new();
        slot.resolve(result);
        Self {
            status,
            result: rx,
            format,
        }
    }

    /// A fresh observer of this recording's status stream.
    pub fn status(&self) -> StatusReceiver {
        self.status.clone()
    }

    /// The result if the recording has already resolved.
    pub fn try_result(&mut self) -> Option<RecordingResult> {
        self.result.try_recv().ok()
    }

    /// Wait for the recording to resolve.
    pub async fn result(self) -> RecordingResult {
        match self.result.await {
            Ok(r) => r,
            Err(_) => RecordingResult::failed(
                self.format,
                &CaptureError::Other(anyhow::anyhow!("capture task ended without a result")),
                0,
            ),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Registry fields hold plain data; a poisoned guard is still consistent.
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Recorder {
    /// Recorder with default options, encoding GIF in-process and video through `ffmpeg`.
    pub fn new(engine: SharedEngine) -> CaptureResult<Self> {
        Self::with_parts(engine, CaptureOptions::default(), Arc::new(DefaultSinks))
    }

    /// Recorder with explicit options and encoder sinks.
    ///
    /// Shares the engine's session lock, so every recorder over one engine admits a single
    /// capture at a time.
    pub fn with_parts(
        engine: SharedEngine,
        options: CaptureOptions,
        sinks: Arc<dyn SinkFactory>,
    ) -> CaptureResult<Self> {
        let lock = lock_engine(&engine)?.session_lock();
        let (state, _) = watch::channel(CaptureState::Idle);
        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                lock,
                options,
                sinks,
                active_stop: Mutex::new(None),
                last_result: Mutex::new(None),
                state: Arc::new(state),
            }),
        })
    }

    /// The bound engine adapter.
    pub fn engine(&self) -> &SharedEngine {
        &self.inner.engine
    }

    /// Begin a capture. Always returns a handle; failures resolve it immediately.
    ///
    /// Validation happens before anything else is touched, so an invalid config never disturbs an
    /// in-flight session. A rejected concurrent start does not replace the stored last result.
    pub fn start_recording(
        &self,
        config: RecordingConfig,
        on_status: Option<StatusCallback>,
    ) -> RecordingHandle {
        let format = config.format;
        let (status_tx, status_rx) = status_channel(on_status);

        if let Err(e) = config.validate() {
            tracing::warn!(export_id = %config.export_id, error = %e, "rejected recording config");
            let result = RecordingResult::failed(format, &e, 0);
            *lock(&self.inner.last_result) = Some(result.clone());
            return RecordingHandle::resolved(status_rx, format, result);
        }

        let Some(guard) = self.inner.lock.try_acquire() else {
            let e = CaptureError::concurrent("a recording is already in progress");
            tracing::warn!(export_id = %config.export_id, "rejected concurrent recording");
            let result = RecordingResult::failed(format, &e, 0);
            return RecordingHandle::resolved(status_rx, format, result);
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                drop(guard);
                let err = CaptureError::Other(anyhow::anyhow!("no tokio runtime: {e}"));
                let result = RecordingResult::failed(format, &err, 0);
                *lock(&self.inner.last_result) = Some(result.clone());
                return RecordingHandle::resolved(status_rx, format, result);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        *lock(&self.inner.active_stop) = Some(stop_tx);
        self.inner.state.send_replace(CaptureState::Preparing);

        let (mut slot, result_rx) = ResultSlot::new();
        let session = CaptureSession::new(
            config,
            self.inner.engine.clone(),
            self.inner.options.clone(),
            self.inner.sinks.clone(),
            status_tx,
            self.inner.state.clone(),
            stop_rx,
        );
        let inner = self.inner.clone();
        runtime.spawn(async move {
            // A panicking engine or status callback still has to release the registry.
            let result = match tokio::spawn(session.run()).await {
                Ok(result) => result,
                Err(e) => {
                    inner.state.send_replace(CaptureState::Failed);
                    tracing::error!(error = %e, "capture task failed");
                    let err = CaptureError::Other(anyhow::anyhow!("capture task failed: {e}"));
                    RecordingResult::failed(format, &err, 0)
                }
            };
            lock(&inner.active_stop).take();
            *lock(&inner.last_result) = Some(result.clone());
            inner.state.send_replace(CaptureState::Idle);
            drop(guard);
            slot.resolve(result);
        });

        RecordingHandle {
            status: status_rx,
            result: result_rx,
            format,
        }
    }

    /// Request an early stop. No-op unless a session is recording.
    pub fn stop_recording(&self) {
        if *self.inner.state.borrow() != CaptureState::Recording {
            tracing::debug!(state = ?*self.inner.state.borrow(), "stop ignored");
            return;
        }
        if let Some(tx) = lock(&self.inner.active_stop).as_ref() {
            tx.send_replace(true);
            tracing::info!("stop requested");
        }
    }

    /// `true` from a successful `start_recording` until its result has resolved.
    pub fn is_recording(&self) -> bool {
        self.inner.lock.is_held()
    }

    /// Current orchestrator state.
    pub fn state(&self) -> CaptureState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<CaptureState> {
        self.inner.state.subscribe()
    }

    /// The most recently resolved result, until cleared. Concurrent-start rejections are not
    /// stored.
    pub fn get_recording_result(&self) -> Option<RecordingResult> {
        lock(&self.inner.last_result).clone()
    }

    /// Forget the stored result.
    pub fn clear_recording_result(&self) {
        lock(&self.inner.last_result).take();
    }

    /// Pass-through playback control on the bound engine, independent of any capture.
    pub fn start_animation(&self) -> CaptureResult<()> {
        if self.is_recording() {
            tracing::warn!("start_animation while a capture is running");
        }
        lock_engine(&self.inner.engine)?.play()
    }

    /// Pause the bound engine and rewind it to time 0.
    pub fn stop_animation(&self) -> CaptureResult<()> {
        if self.is_recording() {
            tracing::warn!("stop_animation while a capture is running");
        }
        let mut engine = lock_engine(&self.inner.engine)?;
        engine.pause();
        engine.stop();
        Ok(())
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use animcap::{
    CaptureError, CaptureOptions, CaptureResult, EngineBindingAdapter, EngineInstance, FrameIndex,
    FrameRGBA, FrameSink, InMemorySink, OutputFormat, RecordedFrames, Recorder, RenderingSurface,
    ResetConfig, Resolution, SinkConfig, SinkFactory, shared,
};
use tokio_util::sync::CancellationToken;

pub const RED: [u8; 4] = [255, 0, 0, 255];

/// Route library logs into the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Play,
    Pause,
    Stop,
    Reset { instance: u32, artboard: String },
    Set { instance: u32, path: String, value: String },
    Capture,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

/// Engine fake that logs every call, tagging value writes with the live instance number.
pub struct RecordingEngine {
    log: EventLog,
    instance: u32,
}

impl RecordingEngine {
    pub fn new(log: EventLog) -> Self {
        Self { log, instance: 0 }
    }

    fn push(&self, e: Event) {
        self.log.lock().unwrap().push(e);
    }

    fn set(&self, path: &str, value: String) -> CaptureResult<()> {
        self.push(Event::Set {
            instance: self.instance,
            path: path.to_string(),
            value,
        });
        Ok(())
    }
}

impl EngineInstance for RecordingEngine {
    fn play(&mut self, _state_machine: &str) -> CaptureResult<()> {
        self.push(Event::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.push(Event::Pause);
    }

    fn stop(&mut self) {
        self.push(Event::Stop);
    }

    fn reset(&mut self, cfg: &ResetConfig) -> CaptureResult<()> {
        self.instance += 1;
        self.push(Event::Reset {
            instance: self.instance,
            artboard: cfg.artboard.clone(),
        });
        Ok(())
    }

    fn set_string(&mut self, path: &str, value: &str) -> CaptureResult<()> {
        self.set(path, value.to_string())
    }

    fn set_number(&mut self, path: &str, value: f32) -> CaptureResult<()> {
        self.set(path, value.to_string())
    }

    fn set_boolean(&mut self, path: &str, value: bool) -> CaptureResult<()> {
        self.set(path, value.to_string())
    }
}

/// Surface showing one solid color. Honors resizes.
pub struct StaticSurface {
    resolution: Mutex<Resolution>,
    rgba: [u8; 4],
    log: Option<EventLog>,
}

impl StaticSurface {
    pub fn new(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            resolution: Mutex::new(Resolution::new(width, height).unwrap()),
            rgba,
            log: None,
        }
    }

    pub fn logging(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }
}

#[async_trait::async_trait]
impl RenderingSurface for StaticSurface {
    fn selector(&self) -> &str {
        "#static"
    }

    fn resolution(&self) -> Resolution {
        *self.resolution.lock().unwrap()
    }

    fn resize(&self, resolution: Resolution) {
        *self.resolution.lock().unwrap() = resolution;
    }

    async fn capture_frame(&self) -> CaptureResult<FrameRGBA> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(Event::Capture);
        }
        let r = self.resolution();
        Ok(FrameRGBA::solid(r.width, r.height, self.rgba))
    }
}

/// Surface whose reads fail; every read when `every` is 1, else every `every`-th read.
pub struct FailingSurface {
    every: u64,
    reads: AtomicU64,
}

impl FailingSurface {
    pub fn always() -> Self {
        Self::every(1)
    }

    pub fn every(n: u64) -> Self {
        Self {
            every: n.max(1),
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RenderingSurface for FailingSurface {
    fn selector(&self) -> &str {
        "#failing"
    }

    fn resolution(&self) -> Resolution {
        Resolution::new(8, 8).unwrap()
    }

    fn resize(&self, _resolution: Resolution) {}

    async fn capture_frame(&self) -> CaptureResult<FrameRGBA> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.every == 0 {
            return Err(CaptureError::frame_capture("surface read failed"));
        }
        Ok(FrameRGBA::solid(8, 8, RED))
    }
}

/// Surface whose reads never complete.
pub struct StalledSurface;

#[async_trait::async_trait]
impl RenderingSurface for StalledSurface {
    fn selector(&self) -> &str {
        "#stalled"
    }

    fn resolution(&self) -> Resolution {
        Resolution::new(8, 8).unwrap()
    }

    fn resize(&self, _resolution: Resolution) {}

    async fn capture_frame(&self) -> CaptureResult<FrameRGBA> {
        std::future::pending().await
    }
}

/// Sink factory handing out [`InMemorySink`]s, keeping each session's frames readable.
#[derive(Default)]
pub struct MemorySinks {
    sessions: Mutex<Vec<(OutputFormat, RecordedFrames)>>,
}

impl MemorySinks {
    pub fn sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Frames of the most recent session.
    pub fn last_frames(&self) -> Vec<(FrameIndex, FrameRGBA)> {
        let sessions = self.sessions.lock().unwrap();
        let (_, frames) = sessions.last().expect("no session created a sink");
        let frames = frames.lock().unwrap().clone();
        frames
    }
}

impl SinkFactory for MemorySinks {
    fn make_sink(&self, format: OutputFormat) -> Box<dyn FrameSink> {
        let sink = InMemorySink::new();
        self.sessions.lock().unwrap().push((format, sink.recorded()));
        Box::new(sink)
    }
}

/// How a [`ScriptedSink`] seals its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndBehavior {
    /// Return the raw frames like [`InMemorySink`].
    Bytes,
    /// Fail with an encoding error.
    Fail,
    /// Block until the session cancels the sink.
    BlockUntilCancelled,
}

/// Sink factory whose sinks can be slow, fail or hang. Tracks how many sinks are still alive.
pub struct ScriptedSinks {
    push_delay: Duration,
    end: EndBehavior,
    frames: Mutex<Vec<RecordedFrames>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedSinks {
    pub fn new(push_delay: Duration, end: EndBehavior) -> Arc<Self> {
        Arc::new(Self {
            push_delay,
            end,
            frames: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Sinks created and not yet dropped.
    pub fn live_sinks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn last_frames(&self) -> Vec<(FrameIndex, FrameRGBA)> {
        let sessions = self.frames.lock().unwrap();
        let frames = sessions.last().expect("no session created a sink");
        let frames = frames.lock().unwrap().clone();
        frames
    }
}

impl SinkFactory for ScriptedSinks {
    fn make_sink(&self, _format: OutputFormat) -> Box<dyn FrameSink> {
        let inner = InMemorySink::new();
        self.frames.lock().unwrap().push(inner.recorded());
        self.live.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedSink {
            inner,
            push_delay: self.push_delay,
            end: self.end,
            cancel: CancellationToken::new(),
            live: self.live.clone(),
        })
    }
}

struct ScriptedSink {
    inner: InMemorySink,
    push_delay: Duration,
    end: EndBehavior,
    cancel: CancellationToken,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedSink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrameSink for ScriptedSink {
    fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn begin(&mut self, cfg: SinkConfig) -> CaptureResult<()> {
        self.inner.begin(cfg)
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> CaptureResult<()> {
        if !self.push_delay.is_zero() {
            std::thread::sleep(self.push_delay);
        }
        self.inner.push_frame(idx, frame)
    }

    fn end(&mut self) -> CaptureResult<Vec<u8>> {
        match self.end {
            EndBehavior::Bytes => self.inner.end(),
            EndBehavior::Fail => Err(CaptureError::encoding("muxer rejected the stream")),
            EndBehavior::BlockUntilCancelled => {
                let give_up = std::time::Instant::now() + Duration::from_secs(30);
                while !self.cancel.is_cancelled() && std::time::Instant::now() < give_up {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(CaptureError::encoding("sink cancelled while sealing"))
            }
        }
    }
}

pub struct Rig {
    pub recorder: Recorder,
    pub log: EventLog,
    pub sinks: Arc<MemorySinks>,
}

/// Recorder over a logging engine and `surface`, encoding into memory.
pub fn rig(surface: Arc<dyn RenderingSurface>) -> Rig {
    rig_with(surface, CaptureOptions::default())
}

pub fn rig_with(surface: Arc<dyn RenderingSurface>, options: CaptureOptions) -> Rig {
    init_tracing();
    let log = EventLog::default();
    let mut adapter = EngineBindingAdapter::new(Box::new(RecordingEngine::new(log.clone())));
    adapter.attach_surface(surface);
    let sinks = Arc::new(MemorySinks::default());
    let recorder = Recorder::with_parts(shared(adapter), options, sinks.clone()).unwrap();
    Rig {
        recorder,
        log,
        sinks,
    }
}

/// Recorder over a logging engine and `surface`, encoding through `sinks`.
pub fn recorder_with_sinks(
    surface: Arc<dyn RenderingSurface>,
    options: CaptureOptions,
    sinks: Arc<dyn SinkFactory>,
) -> Recorder {
    init_tracing();
    let mut adapter =
        EngineBindingAdapter::new(Box::new(RecordingEngine::new(EventLog::default())));
    adapter.attach_surface(surface);
    Recorder::with_parts(shared(adapter), options, sinks).unwrap()
}

pub fn red_surface(width: u32, height: u32) -> Arc<dyn RenderingSurface> {
    Arc::new(StaticSurface::new(width, height, RED))
}

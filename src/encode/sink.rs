use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::OutputFormat;
use crate::foundation::core::{FrameIndex, FrameRGBA, Resolution};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Configuration handed to a [`FrameSink`] when a capture starts.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    /// Size of every frame pushed into the sink.
    pub resolution: Resolution,
    /// Frames per second of the output timeline.
    pub fps: u32,
    /// Output container.
    pub format: OutputFormat,
    /// Format-specific quality hint.
    pub quality: Option<f32>,
    /// Video bitrate in bits per second.
    pub bitrate: Option<u32>,
    /// Background (straight RGBA8) used to flatten alpha.
    pub bg_rgba: [u8; 4],
}

/// Encoder contract shared by both capture strategies.
///
/// Ordering contract: `push_frame` is called in strictly increasing `FrameIndex` order, and every
/// pushed frame already has `SinkConfig::resolution`. `end` seals the container and returns its
/// bytes. A sink dropped without `end` must release whatever it holds (child processes, buffers).
pub trait FrameSink: Send {
    /// Token the session cancels when it gives up on this sink, handed over before `begin`.
    ///
    /// Sinks that can block (`end` on a slow encoder, writes into a stalled pipe) watch it and
    /// return early with an encoding error. The default ignores it.
    fn set_cancel_token(&mut self, _token: CancellationToken) {}

    /// Open the container for frames described by `cfg`.
    fn begin(&mut self, cfg: SinkConfig) -> CaptureResult<()>;
    /// Append one frame.
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> CaptureResult<()>;
    /// Seal the container and return its bytes.
    fn end(&mut self) -> CaptureResult<Vec<u8>>;
}

/// Frames captured by an [`InMemorySink`], shared so they stay readable after the sink is gone.
pub type RecordedFrames = Arc<Mutex<Vec<(FrameIndex, FrameRGBA)>>>;

/// Sink for tests and debugging. `end` returns the concatenated raw RGBA8 of all frames.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: RecordedFrames,
    ended: bool,
}

impl InMemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config passed to the last `begin`.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg.clone()
    }

    /// Handle onto the captured frames.
    pub fn recorded(&self) -> RecordedFrames {
        self.frames.clone()
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> CaptureResult<()> {
        self.cfg = Some(cfg);
        self.ended = false;
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> CaptureResult<()> {
        if self.cfg.is_none() || self.ended {
            return Err(CaptureError::encoding("in-memory sink is not accepting frames"));
        }
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| CaptureError::encoding("in-memory sink frame log poisoned"))?;
        frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> CaptureResult<Vec<u8>> {
        self.ended = true;
        let frames = self
            .frames
            .lock()
            .map_err(|_| CaptureError::encoding("in-memory sink frame log poisoned"))?;
        Ok(frames
            .iter()
            .flat_map(|(_, f)| f.data.iter().copied())
            .collect())
    }
}

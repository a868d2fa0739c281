//! Frame source strategies.
//!
//! A strategy owns one encoder sink for one capture session and decides how sampled frames and
//! elapsed time turn into progress. The orchestrator drives every strategy through the same
//! `start -> feed* -> finalize | abort` contract.

/// Per-tick sampling for image-sequence output.
pub mod discrete;
/// Continuous streaming for muxed video output.
pub mod stream;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{CaptureOptions, OutputFormat, RecordingConfig};
use crate::encode::ffmpeg::FfmpegSink;
use crate::encode::gif::GifSink;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::FrameRGBA;
use crate::foundation::error::{CaptureError, CaptureResult};

pub use discrete::DiscreteSampler;
pub use stream::StreamCapture;

/// A strategy's encoder work, running on the blocking pool.
///
/// Owns everything the encoder holds. Once [`join`](Self::join) or [`cancel`](Self::cancel)
/// returns, the sink and any encoder process are gone.
pub struct EncodeTask {
    handle: JoinHandle<CaptureResult<Vec<u8>>>,
    token: CancellationToken,
}

impl EncodeTask {
    /// Run `work` on the blocking pool; cancelling trips `token`.
    pub fn spawn<F>(token: CancellationToken, work: F) -> Self
    where
        F: FnOnce() -> CaptureResult<Vec<u8>> + Send + 'static,
    {
        Self {
            handle: tokio::task::spawn_blocking(work),
            token,
        }
    }

    /// Wait for the container bytes.
    pub async fn join(self) -> CaptureResult<Vec<u8>> {
        fold(self.handle.await)
    }

    /// Wait for the container bytes until `deadline`. Past it, cancel the encoder, wait for it to
    /// let go of its sink and return `None`.
    pub async fn join_until(mut self, deadline: Instant) -> Option<CaptureResult<Vec<u8>>> {
        match tokio::time::timeout_at(deadline, &mut self.handle).await {
            Ok(joined) => Some(fold(joined)),
            Err(_) => {
                tracing::warn!("encoder still busy at the deadline, cancelling");
                self.cancel().await;
                None
            }
        }
    }

    /// Cancel the encoder and wait until it has released everything.
    pub async fn cancel(self) {
        self.token.cancel();
        match self.handle.await {
            Ok(Ok(_)) => tracing::debug!("encoder finished despite cancel, output discarded"),
            Ok(Err(e)) => tracing::debug!(error = %e, "encoder cancelled"),
            Err(e) => tracing::warn!(error = %e, "encoder task failed while cancelling"),
        }
    }
}

fn fold(
    joined: Result<CaptureResult<Vec<u8>>, tokio::task::JoinError>,
) -> CaptureResult<Vec<u8>> {
    joined.map_err(|e| CaptureError::encoding(format!("encoder task failed: {e}")))?
}

/// Which strategy a [`FrameSource`] implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Per-tick samples into an image-sequence encoder.
    DiscreteSample,
    /// Ongoing pixel stream into a muxed video encoder.
    ContinuousStream,
}

/// Strategy-reported position within the capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Captured time in milliseconds.
    pub elapsed_ms: u64,
    /// Frames covered.
    pub frames: u64,
    /// The strategy has covered the configured duration (or can accept no more input).
    pub done: bool,
}

/// One capture strategy: `start -> (feed | skip)* -> finalize | abort`.
pub trait FrameSource: Send {
    /// Strategy implemented.
    fn kind(&self) -> SourceKind;

    /// `true` when `play()` must wait for the first sampling tick; `false` when it is issued as
    /// soon as the source has started.
    fn play_on_first_tick(&self) -> bool;

    /// Open the encoder; `now` is time 0 of the capture.
    fn start(&mut self, cfg: SinkConfig, now: Instant) -> CaptureResult<()>;

    /// Hand one sampled surface frame to the strategy.
    ///
    /// Errors of kind `FrameCapture` concern only this frame; any other kind is fatal.
    fn feed(&mut self, frame: &FrameRGBA, now: Instant) -> CaptureResult<()>;

    /// Account for a tick whose sample could not be read.
    ///
    /// Time still advances; the strategy holds its previous frame over the gap.
    fn skip(&mut self, now: Instant) -> CaptureResult<()>;

    /// Position within the capture as of `now`.
    fn progress(&self, now: Instant) -> Progress;

    /// Seal the encoder at `now`. The returned task resolves with the container bytes.
    fn finalize(self: Box<Self>, now: Instant) -> EncodeTask;

    /// Cancel the encoder without producing output. Cancel the returned task to wait for the
    /// teardown.
    fn abort(self: Box<Self>) -> EncodeTask;
}

/// Builds the encoder sink for an output format.
pub trait SinkFactory: Send + Sync {
    /// A fresh sink for one session.
    fn make_sink(&self, format: OutputFormat) -> Box<dyn FrameSink>;
}

/// GIF through the image crate, WebM/MP4 through system `ffmpeg`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSinks;

impl SinkFactory for DefaultSinks {
    fn make_sink(&self, format: OutputFormat) -> Box<dyn FrameSink> {
        match format {
            OutputFormat::Gif => Box::new(GifSink::new()),
            OutputFormat::Webm | OutputFormat::Mp4 => Box::new(FfmpegSink::new()),
        }
    }
}

/// Pick the strategy for `cfg.format`.
pub fn select_source(
    cfg: &RecordingConfig,
    sinks: &dyn SinkFactory,
    opts: &CaptureOptions,
) -> Box<dyn FrameSource> {
    let sink = sinks.make_sink(cfg.format);
    match cfg.format {
        OutputFormat::Gif => Box::new(DiscreteSampler::new(sink, cfg.duration_ms)),
        OutputFormat::Webm | OutputFormat::Mp4 => Box::new(StreamCapture::new(
            sink,
            cfg.duration_ms,
            opts.stream_channel_capacity,
        )),
    }
}

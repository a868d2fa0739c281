use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::encode::pixels::prepare_frame_rgba;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA, frames_to_cover, sampled_time_ms};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::source::{EncodeTask, FrameSource, Progress, SourceKind};

/// Timer-driven discrete sampler.
///
/// Elapsed time is `ticks * period`, never a clock read, so a given `(duration, fps)` always
/// yields the same frame count no matter how late individual ticks fire. Every tick owns one
/// output frame: a tick whose read failed repeats the previous frame, and ticks that failed before
/// the first readable frame show that frame.
pub struct DiscreteSampler {
    sink: Box<dyn FrameSink>,
    cfg: Option<SinkConfig>,
    cancel: CancellationToken,
    duration_ms: u32,
    target_ticks: u64,
    ticks: u64,
    last: Option<FrameRGBA>,
}

impl DiscreteSampler {
    /// Sampler covering `duration_ms` into `sink`.
    pub fn new(sink: Box<dyn FrameSink>, duration_ms: u32) -> Self {
        Self {
            sink,
            cfg: None,
            cancel: CancellationToken::new(),
            duration_ms,
            target_ticks: 0,
            ticks: 0,
            last: None,
        }
    }

    fn covered(&self) -> bool {
        self.cfg.is_some() && self.ticks >= self.target_ticks
    }
}

impl FrameSource for DiscreteSampler {
    fn kind(&self) -> SourceKind {
        SourceKind::DiscreteSample
    }

    fn play_on_first_tick(&self) -> bool {
        true
    }

    fn start(&mut self, cfg: SinkConfig, _now: Instant) -> CaptureResult<()> {
        self.target_ticks = frames_to_cover(self.duration_ms, cfg.fps);
        self.sink.set_cancel_token(self.cancel.clone());
        self.sink.begin(cfg.clone())?;
        self.cfg = Some(cfg);
        self.ticks = 0;
        self.last = None;
        Ok(())
    }

    fn feed(&mut self, frame: &FrameRGBA, _now: Instant) -> CaptureResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CaptureError::encoding("discrete sampler not started"))?;
        if self.covered() {
            return Ok(());
        }
        let prepared = prepare_frame_rgba(frame, cfg.resolution, cfg.bg_rgba)?;
        if self.last.is_none() {
            for idx in 0..self.ticks {
                self.sink.push_frame(FrameIndex(idx), &prepared)?;
            }
        }
        self.sink.push_frame(FrameIndex(self.ticks), &prepared)?;
        self.ticks += 1;
        self.last = Some(prepared);
        Ok(())
    }

    fn skip(&mut self, _now: Instant) -> CaptureResult<()> {
        if self.cfg.is_none() || self.covered() {
            return Ok(());
        }
        if let Some(last) = &self.last {
            self.sink.push_frame(FrameIndex(self.ticks), last)?;
        }
        self.ticks += 1;
        Ok(())
    }

    fn progress(&self, _now: Instant) -> Progress {
        let fps = self.cfg.as_ref().map(|c| c.fps).unwrap_or(1);
        Progress {
            elapsed_ms: sampled_time_ms(self.ticks, fps),
            frames: self.ticks,
            done: self.covered(),
        }
    }

    fn finalize(self: Box<Self>, _now: Instant) -> EncodeTask {
        let this = *self;
        let mut sink = this.sink;
        let ticks = this.ticks;
        EncodeTask::spawn(this.cancel, move || {
            tracing::debug!(frames = ticks, "rendering image sequence");
            sink.end()
        })
    }

    fn abort(self: Box<Self>) -> EncodeTask {
        let this = *self;
        this.cancel.cancel();
        tracing::debug!(ticks = this.ticks, "discrete sampler aborted");
        let sink = this.sink;
        EncodeTask::spawn(this.cancel, move || {
            drop(sink);
            Err(CaptureError::encoding("capture aborted"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::encode::sink::InMemorySink;
    use crate::foundation::core::Resolution;

    fn cfg(fps: u32) -> SinkConfig {
        SinkConfig {
            resolution: Resolution {
                width: 4,
                height: 4,
            },
            fps,
            format: OutputFormat::Gif,
            quality: None,
            bitrate: None,
            bg_rgba: [0, 0, 0, 255],
        }
    }

    #[tokio::test]
    async fn stops_accepting_at_target_and_reports_sampled_time() {
        let sink = InMemorySink::new();
        let recorded = sink.recorded();
        let mut s = Box::new(DiscreteSampler::new(Box::new(sink), 1000));
        let now = Instant::now();
        s.start(cfg(10), now).unwrap();

        let frame = FrameRGBA::solid(4, 4, [255, 0, 0, 255]);
        for _ in 0..12 {
            s.feed(&frame, now).unwrap();
        }
        let p = s.progress(now);
        assert_eq!(p.frames, 10);
        assert_eq!(p.elapsed_ms, 1000);
        assert!(p.done);

        let bytes = s.finalize(now).join().await.unwrap();
        assert_eq!(bytes.len(), 10 * 4 * 4 * 4);
        let frames = recorded.lock().unwrap();
        assert!(frames.iter().enumerate().all(|(i, (idx, _))| idx.0 == i as u64));
    }

    #[test]
    fn skipped_ticks_advance_time_and_hold_the_previous_frame() {
        let sink = InMemorySink::new();
        let recorded = sink.recorded();
        let mut s = DiscreteSampler::new(Box::new(sink), 500);
        let now = Instant::now();
        s.start(cfg(10), now).unwrap();

        let red = FrameRGBA::solid(4, 4, [255, 0, 0, 255]);
        let blue = FrameRGBA::solid(4, 4, [0, 0, 255, 255]);
        s.skip(now).unwrap();
        s.feed(&red, now).unwrap();
        s.skip(now).unwrap();
        s.feed(&blue, now).unwrap();
        s.skip(now).unwrap();

        let p = s.progress(now);
        assert_eq!(p.frames, 5);
        assert_eq!(p.elapsed_ms, 500);
        assert!(p.done);

        let frames = recorded.lock().unwrap();
        let colors: Vec<[u8; 4]> = frames
            .iter()
            .map(|(_, f)| [f.data[0], f.data[1], f.data[2], f.data[3]])
            .collect();
        let (r, b) = ([255, 0, 0, 255], [0, 0, 255, 255]);
        assert_eq!(colors, vec![r, r, r, b, b]);
        assert!(frames.iter().enumerate().all(|(i, (idx, _))| idx.0 == i as u64));
    }

    #[test]
    fn bad_frame_is_a_frame_capture_error() {
        let mut s = DiscreteSampler::new(Box::new(InMemorySink::new()), 1000);
        s.start(cfg(10), Instant::now()).unwrap();
        let mut frame = FrameRGBA::solid(4, 4, [255, 0, 0, 255]);
        frame.data.truncate(3);
        let err = s.feed(&frame, Instant::now()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FrameCapture);
        assert_eq!(s.progress(Instant::now()).frames, 0);
    }
}

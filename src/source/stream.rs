use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::encode::pixels::prepare_frame_rgba;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA, slot_at};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::source::{EncodeTask, FrameSource, Progress, SourceKind};

/// Continuous stream into a muxed video encoder.
///
/// Each frame is stamped with the frame period it was sampled in, measured from when the stream
/// opened, and flows through a bounded channel to a dedicated encoder thread. When the encoder
/// lags the frame is dropped rather than stalling the sampling loop. The encoder thread repeats
/// the previous frame for every period nothing arrived for, so the encoded timeline matches
/// wall-clock time. Progress is wall-clock time since the stream opened.
pub struct StreamCapture {
    sink: Option<Box<dyn FrameSink>>,
    duration_ms: u32,
    capacity: usize,
    cfg: Option<SinkConfig>,
    tx: Option<SyncSender<(u64, FrameRGBA)>>,
    worker: Option<JoinHandle<CaptureResult<Vec<u8>>>>,
    cancel: CancellationToken,
    end_slot: Arc<AtomicU64>,
    started_at: Option<Instant>,
    next_slot: u64,
    sent: u64,
    dropped: u64,
    closed: bool,
}

impl StreamCapture {
    /// Stream covering `duration_ms` into `sink`, buffering at most `capacity` frames.
    pub fn new(sink: Box<dyn FrameSink>, duration_ms: u32, capacity: usize) -> Self {
        Self {
            sink: Some(sink),
            duration_ms,
            capacity: capacity.max(1),
            cfg: None,
            tx: None,
            worker: None,
            cancel: CancellationToken::new(),
            end_slot: Arc::new(AtomicU64::new(0)),
            started_at: None,
            next_slot: 0,
            sent: 0,
            dropped: 0,
            closed: false,
        }
    }

    /// Frames discarded because the encoder thread was behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

fn stream_aborted() -> CaptureError {
    CaptureError::encoding("stream aborted")
}

/// Push `frame` for every period from `*next` up to `until`.
fn fill(
    sink: &mut dyn FrameSink,
    next: &mut u64,
    until: u64,
    frame: &FrameRGBA,
    cancel: &CancellationToken,
) -> CaptureResult<()> {
    while *next < until {
        if cancel.is_cancelled() {
            return Err(stream_aborted());
        }
        sink.push_frame(FrameIndex(*next), frame)?;
        *next += 1;
    }
    Ok(())
}

fn encoder_loop(
    mut sink: Box<dyn FrameSink>,
    rx: mpsc::Receiver<(u64, FrameRGBA)>,
    cancel: CancellationToken,
    end_slot: Arc<AtomicU64>,
) -> CaptureResult<Vec<u8>> {
    let mut next = 0u64;
    let mut repeated = 0u64;
    let mut last: Option<FrameRGBA> = None;
    while let Ok((slot, frame)) = rx.recv() {
        let before = next;
        fill(
            sink.as_mut(),
            &mut next,
            slot,
            last.as_ref().unwrap_or(&frame),
            &cancel,
        )?;
        repeated += next - before;
        fill(sink.as_mut(), &mut next, slot + 1, &frame, &cancel)?;
        last = Some(frame);
    }
    if cancel.is_cancelled() {
        return Err(stream_aborted());
    }
    if let Some(frame) = &last {
        let before = next;
        fill(
            sink.as_mut(),
            &mut next,
            end_slot.load(Ordering::Acquire),
            frame,
            &cancel,
        )?;
        repeated += next - before;
    }
    tracing::debug!(frames = next, repeated, "stream closed, sealing container");
    sink.end()
}

impl FrameSource for StreamCapture {
    fn kind(&self) -> SourceKind {
        SourceKind::ContinuousStream
    }

    fn play_on_first_tick(&self) -> bool {
        false
    }

    fn start(&mut self, cfg: SinkConfig, now: Instant) -> CaptureResult<()> {
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| CaptureError::encoding("stream already started"))?;
        sink.set_cancel_token(self.cancel.clone());
        sink.begin(cfg.clone())?;

        let (tx, rx) = mpsc::sync_channel::<(u64, FrameRGBA)>(self.capacity);
        let cancel = self.cancel.clone();
        let end_slot = self.end_slot.clone();
        let worker = std::thread::Builder::new()
            .name("animcap-stream-encoder".into())
            .spawn(move || encoder_loop(sink, rx, cancel, end_slot))
            .map_err(|e| CaptureError::encoding(format!("failed to spawn encoder thread: {e}")))?;

        self.tx = Some(tx);
        self.worker = Some(worker);
        self.cfg = Some(cfg);
        self.started_at = Some(now);
        Ok(())
    }

    fn feed(&mut self, frame: &FrameRGBA, now: Instant) -> CaptureResult<()> {
        let (Some(cfg), Some(started)) = (self.cfg.as_ref(), self.started_at) else {
            return Err(CaptureError::encoding("stream not started"));
        };
        let Some(tx) = self.tx.as_ref() else {
            return Ok(());
        };
        let slot = slot_at(now.saturating_duration_since(started), cfg.fps);
        if slot < self.next_slot {
            tracing::trace!(slot, "frame period already covered");
            return Ok(());
        }
        let prepared = prepare_frame_rgba(frame, cfg.resolution, cfg.bg_rgba)?;
        match tx.try_send((slot, prepared)) {
            Ok(()) => {
                self.sent += 1;
                self.next_slot = slot + 1;
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::debug!(dropped = self.dropped, "encoder behind, frame dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                // Worker exited early; finalize surfaces its error.
                self.closed = true;
            }
        }
        Ok(())
    }

    fn skip(&mut self, _now: Instant) -> CaptureResult<()> {
        // The encoder thread holds the previous frame over the gap.
        Ok(())
    }

    fn progress(&self, now: Instant) -> Progress {
        let Some(started) = self.started_at else {
            return Progress::default();
        };
        let elapsed_ms = now.saturating_duration_since(started).as_millis() as u64;
        let fps = self.cfg.as_ref().map(|c| c.fps).unwrap_or(1);
        Progress {
            elapsed_ms,
            frames: elapsed_ms * u64::from(fps) / 1000,
            done: self.closed || elapsed_ms >= u64::from(self.duration_ms),
        }
    }

    fn finalize(mut self: Box<Self>, now: Instant) -> EncodeTask {
        if let (Some(cfg), Some(started)) = (self.cfg.as_ref(), self.started_at) {
            let end = slot_at(now.saturating_duration_since(started), cfg.fps);
            self.end_slot.store(end, Ordering::Release);
        }
        drop(self.tx.take());
        let worker = self.worker.take();
        if self.dropped > 0 {
            tracing::warn!(
                sent = self.sent,
                dropped = self.dropped,
                "stream encoder fell behind, dropped frames are held over"
            );
        }
        EncodeTask::spawn(self.cancel.clone(), move || match worker {
            Some(handle) => handle
                .join()
                .map_err(|_| CaptureError::encoding("stream encoder thread panicked"))?,
            None => Err(CaptureError::encoding("stream was never started")),
        })
    }

    fn abort(mut self: Box<Self>) -> EncodeTask {
        self.cancel.cancel();
        drop(self.tx.take());
        let worker = self.worker.take();
        tracing::debug!(sent = self.sent, "stream capture aborted");
        EncodeTask::spawn(self.cancel.clone(), move || {
            if let Some(handle) = worker {
                let _ = handle.join();
            }
            Err(stream_aborted())
        })
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        if self.tx.is_some() || self.worker.is_some() {
            self.cancel.cancel();
            drop(self.tx.take());
            // The worker sees the cancel (or the closed channel) and drops its sink.
            tracing::debug!(sent = self.sent, "stream capture dropped mid-stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::encode::sink::InMemorySink;
    use crate::foundation::core::{Resolution, frame_period};
    use std::time::Duration;

    fn cfg() -> SinkConfig {
        SinkConfig {
            resolution: Resolution {
                width: 2,
                height: 2,
            },
            fps: 30,
            format: OutputFormat::Webm,
            quality: None,
            bitrate: None,
            bg_rgba: [0, 0, 0, 255],
        }
    }

    #[tokio::test]
    async fn progress_follows_wall_clock_and_finalize_yields_bytes() {
        let sink = InMemorySink::new();
        let recorded = sink.recorded();
        let mut s = Box::new(StreamCapture::new(Box::new(sink), 500, 64));
        let t0 = Instant::now();
        s.start(cfg(), t0).unwrap();

        let period = frame_period(30);
        let frame = FrameRGBA::solid(2, 2, [0, 0, 255, 255]);
        for k in 0..5 {
            s.feed(&frame, t0 + period * k).unwrap();
        }
        let p = s.progress(t0 + Duration::from_millis(250));
        assert_eq!(p.elapsed_ms, 250);
        assert!(!p.done);
        assert!(s.progress(t0 + Duration::from_millis(500)).done);

        let bytes = s.finalize(t0 + period * 4).join().await.unwrap();
        assert_eq!(bytes.len(), 5 * 2 * 2 * 4);
        assert_eq!(recorded.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn gaps_in_the_stream_repeat_the_previous_frame() {
        let sink = InMemorySink::new();
        let recorded = sink.recorded();
        let mut s = Box::new(StreamCapture::new(Box::new(sink), 1000, 64));
        let t0 = Instant::now();
        s.start(cfg(), t0).unwrap();

        let period = frame_period(30);
        let red = FrameRGBA::solid(2, 2, [255, 0, 0, 255]);
        let blue = FrameRGBA::solid(2, 2, [0, 0, 255, 255]);
        s.feed(&red, t0).unwrap();
        // Same period again: already covered.
        s.feed(&blue, t0 + period / 2).unwrap();
        s.feed(&blue, t0 + period * 3).unwrap();

        s.finalize(t0 + period * 6).join().await.unwrap();
        let frames = recorded.lock().unwrap();
        let reds: Vec<bool> = frames.iter().map(|(_, f)| f.data[0] == 255).collect();
        assert_eq!(reds, vec![true, true, true, false, false, false]);
        assert!(frames.iter().enumerate().all(|(i, (idx, _))| idx.0 == i as u64));
    }

    #[tokio::test]
    async fn finalize_without_start_is_an_encoding_error() {
        let s = Box::new(StreamCapture::new(Box::new(InMemorySink::new()), 500, 4));
        let err = s.finalize(Instant::now()).join().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Encoding);
    }

    #[tokio::test]
    async fn abort_releases_the_sink_before_returning() {
        let sink = InMemorySink::new();
        let recorded = sink.recorded();
        let mut s = Box::new(StreamCapture::new(Box::new(sink), 500, 4));
        let t0 = Instant::now();
        s.start(cfg(), t0).unwrap();
        s.feed(&FrameRGBA::solid(2, 2, [0, 255, 0, 255]), t0).unwrap();

        s.abort().cancel().await;
        // The sink went away with the encoder thread, leaving this handle as the only owner.
        assert_eq!(Arc::strong_count(&recorded), 1);
    }
}

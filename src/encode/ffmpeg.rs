use std::io::{Read, Write as _};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::{DEFAULT_VIDEO_BITRATE, OutputFormat};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Muxed-video sink that spawns the system `ffmpeg`, streams raw frames to its stdin and collects
/// the container bytes from its stdout.
///
/// WebM is VP9; MP4 is H.264 written as fragmented MP4 so it can be muxed into a pipe.
///
/// Cancelling the token handed to [`FrameSink::set_cancel_token`] kills the child, which unblocks
/// both a pending `end` and a frame write into a stalled pipe.
#[derive(Default)]
pub struct FfmpegSink {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Option<ChildStdin>,
    stdout_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
    cancel: Option<CancellationToken>,
    kill_watch: Option<DropGuard>,
}

const WAIT_POLL: Duration = Duration::from_millis(5);

fn lock_child(child: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    child.lock().unwrap_or_else(|p| p.into_inner())
}

impl FfmpegSink {
    /// Sink that spawns `ffmpeg` on `begin`.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Kill the child as soon as the cancel token fires, for as long as this sink lives.
    fn kill_on_cancel(&mut self) {
        let Some(token) = self.cancel.clone() else {
            return;
        };
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let done = CancellationToken::new();
        self.kill_watch = Some(done.clone().drop_guard());
        let child = self.child.clone();
        rt.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(c) = lock_child(&child).as_mut() {
                        let _ = c.kill();
                        tracing::debug!("ffmpeg killed on cancel");
                    }
                }
                _ = done.cancelled() => {}
            }
        });
    }

    /// Wait for ffmpeg to exit, polling so a cancel can cut the wait short.
    fn wait_child(&self) -> CaptureResult<ExitStatus> {
        loop {
            {
                let mut slot = lock_child(&self.child);
                let child = slot
                    .as_mut()
                    .ok_or_else(|| CaptureError::encoding("ffmpeg sink not started"))?;
                if let Some(status) = child.try_wait().map_err(|e| {
                    CaptureError::encoding(format!("failed to wait for ffmpeg to finish: {e}"))
                })? {
                    slot.take();
                    return Ok(status);
                }
                if self.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    slot.take();
                    return Err(CaptureError::encoding("ffmpeg cancelled before it finished"));
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
    }
}

/// Encoder arguments for the output side of the command line.
pub(crate) fn output_args(cfg: &SinkConfig) -> CaptureResult<Vec<String>> {
    let mut args: Vec<String> = vec![
        "-an".into(),
        // yuv420p needs even dimensions; pad odd surfaces by one pixel.
        "-vf".into(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ];

    let rate = |args: &mut Vec<String>, max_crf: f32| match (cfg.bitrate, cfg.quality) {
        (Some(bps), _) => {
            args.extend(["-b:v".into(), bps.to_string()]);
        }
        (None, Some(q)) => {
            let crf = (max_crf * (1.0 - q.clamp(0.0, 1.0))).round() as u32;
            args.extend(["-crf".into(), crf.to_string()]);
        }
        (None, None) => {
            args.extend(["-b:v".into(), DEFAULT_VIDEO_BITRATE.to_string()]);
        }
    };

    match cfg.format {
        OutputFormat::Webm => {
            args.extend(
                ["-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8"]
                    .map(String::from),
            );
            rate(&mut args, 63.0);
            if cfg.bitrate.is_none() && cfg.quality.is_some() {
                // Constant-quality mode for VP9.
                args.extend(["-b:v".into(), "0".into()]);
            }
            args.extend(["-f", "webm", "pipe:1"].map(String::from));
        }
        OutputFormat::Mp4 => {
            args.extend(["-c:v", "libx264", "-preset", "veryfast"].map(String::from));
            rate(&mut args, 51.0);
            args.extend(
                ["-movflags", "frag_keyframe+empty_moov", "-f", "mp4", "pipe:1"].map(String::from),
            );
        }
        OutputFormat::Gif => {
            return Err(CaptureError::config(
                "ffmpeg sink only produces webm or mp4 output",
            ));
        }
    }
    Ok(args)
}

fn drain<R: Read + Send + 'static>(mut r: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
}

fn join_drain(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    what: &str,
) -> CaptureResult<Vec<u8>> {
    match handle {
        Some(h) => h
            .join()
            .map_err(|_| CaptureError::encoding(format!("ffmpeg {what} drain thread panicked")))?
            .map_err(|e| CaptureError::encoding(format!("ffmpeg {what} read failed: {e}"))),
        None => Ok(Vec::new()),
    }
}

impl FrameSink for FfmpegSink {
    fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    fn begin(&mut self, cfg: SinkConfig) -> CaptureResult<()> {
        if cfg.fps == 0 {
            return Err(CaptureError::config("fps must be non-zero"));
        }
        if cfg.resolution.width == 0 || cfg.resolution.height == 0 {
            return Err(CaptureError::config(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        let out_args = output_args(&cfg)?;

        if !is_ffmpeg_on_path() {
            return Err(CaptureError::encoding(
                "ffmpeg is required for video capture, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Input: opaque RGBA8 frames, already flattened and scaled by the capture strategy.
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &cfg.resolution.to_string(),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ])
        .args(&out_args);

        let mut child = cmd.spawn().map_err(|e| {
            CaptureError::encoding(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::encoding("failed to open ffmpeg stdin (unexpected)"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::encoding("failed to open ffmpeg stdout (unexpected)"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CaptureError::encoding("failed to open ffmpeg stderr (unexpected)"))?;

        tracing::debug!(format = %cfg.format, resolution = %cfg.resolution, "ffmpeg started");
        self.stdout_drain = Some(drain(stdout));
        self.stderr_drain = Some(drain(stderr));
        *lock_child(&self.child) = Some(child);
        self.kill_on_cancel();
        self.stdin = Some(stdin);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> CaptureResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CaptureError::encoding("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(CaptureError::encoding(
                "ffmpeg sink received out-of-order frame index",
            ));
        }
        self.last_idx = Some(idx);

        if frame.resolution() != cfg.resolution {
            return Err(CaptureError::encoding(format!(
                "frame size mismatch: got {}, expected {}",
                frame.resolution(),
                cfg.resolution
            )));
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(CaptureError::encoding("ffmpeg sink is already finalized"));
        };
        stdin.write_all(&frame.data).map_err(|e| {
            CaptureError::encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    fn end(&mut self) -> CaptureResult<Vec<u8>> {
        drop(self.stdin.take());
        let waited = self.wait_child();
        self.kill_watch.take();
        // The child is gone either way, so both pipes reach EOF.
        let stdout_bytes = join_drain(self.stdout_drain.take(), "stdout");
        let stderr_bytes = join_drain(self.stderr_drain.take(), "stderr");
        self.cfg = None;

        let status = waited?;
        if self.is_cancelled() {
            return Err(CaptureError::encoding("ffmpeg cancelled before it finished"));
        }
        let stdout_bytes = stdout_bytes?;
        let stderr_bytes = stderr_bytes?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(CaptureError::encoding(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        if stdout_bytes.is_empty() {
            return Err(CaptureError::encoding("ffmpeg produced no output"));
        }
        Ok(stdout_bytes)
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = lock_child(&self.child).take() {
            // Abandoned mid-stream: don't leave an encoder process behind.
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!("ffmpeg sink aborted");
        }
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_GIF_QUALITY, GIF_QUALITY_RANGE};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRGBA};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Image-sequence sink producing a looping GIF.
///
/// Frames are buffered by `push_frame` and only quantized/encoded in `end`, which callers run
/// off the sampling loop.
#[derive(Default)]
pub struct GifSink {
    cfg: Option<SinkConfig>,
    frames: Vec<RgbaImage>,
    last_idx: Option<FrameIndex>,
    cancel: CancellationToken,
}

impl GifSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames buffered so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSink for GifSink {
    fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn begin(&mut self, cfg: SinkConfig) -> CaptureResult<()> {
        if cfg.fps == 0 {
            return Err(CaptureError::config("gif sink fps must be non-zero"));
        }
        if cfg.resolution.width > u32::from(u16::MAX) || cfg.resolution.height > u32::from(u16::MAX)
        {
            return Err(CaptureError::config(format!(
                "gif output {} exceeds the 65535px format limit",
                cfg.resolution
            )));
        }
        self.cfg = Some(cfg);
        self.frames.clear();
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> CaptureResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CaptureError::encoding("gif sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(CaptureError::encoding(
                "gif sink received out-of-order frame index",
            ));
        }
        if frame.resolution() != cfg.resolution {
            return Err(CaptureError::encoding(format!(
                "frame size mismatch: got {}, expected {}",
                frame.resolution(),
                cfg.resolution
            )));
        }
        let img = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| CaptureError::encoding("frame.data size mismatch with width*height*4"))?;
        self.frames.push(img);
        self.last_idx = Some(idx);
        Ok(())
    }

    fn end(&mut self) -> CaptureResult<Vec<u8>> {
        let cfg = self
            .cfg
            .take()
            .ok_or_else(|| CaptureError::encoding("gif sink not started"))?;
        if self.frames.is_empty() {
            return Err(CaptureError::encoding("no frames were captured"));
        }

        let speed = cfg
            .quality
            .map(|q| q as u32)
            .unwrap_or(DEFAULT_GIF_QUALITY)
            .clamp(*GIF_QUALITY_RANGE.start(), *GIF_QUALITY_RANGE.end());
        let delay = Delay::from_numer_denom_ms(1000, cfg.fps);
        let frame_count = self.frames.len();

        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut out, speed as i32);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| CaptureError::encoding(format!("gif repeat setup failed: {e}")))?;
            for img in self.frames.drain(..) {
                if self.cancel.is_cancelled() {
                    return Err(CaptureError::encoding("gif encoding cancelled"));
                }
                encoder
                    .encode_frame(Frame::from_parts(img, 0, 0, delay))
                    .map_err(|e| CaptureError::encoding(format!("gif frame encode failed: {e}")))?;
            }
            // Dropping the encoder writes the GIF trailer.
        }

        tracing::debug!(frames = frame_count, bytes = out.len(), speed, "gif rendered");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::foundation::core::Resolution;

    fn cfg(width: u32, height: u32) -> SinkConfig {
        SinkConfig {
            resolution: Resolution { width, height },
            fps: 10,
            format: OutputFormat::Gif,
            quality: Some(10.0),
            bitrate: None,
            bg_rgba: [255, 255, 255, 255],
        }
    }

    #[test]
    fn encodes_a_looping_gif() {
        let mut sink = GifSink::new();
        sink.begin(cfg(16, 16)).unwrap();
        for i in 0..3 {
            let frame = FrameRGBA::solid(16, 16, [255, 0, 0, 255]);
            sink.push_frame(FrameIndex(i), &frame).unwrap();
        }
        assert_eq!(sink.frame_count(), 3);

        let bytes = sink.end().unwrap();
        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(bytes.last(), Some(&0x3B));
    }

    #[test]
    fn rejects_out_of_order_and_mismatched_frames() {
        let mut sink = GifSink::new();
        sink.begin(cfg(4, 4)).unwrap();
        let frame = FrameRGBA::solid(4, 4, [0, 0, 0, 255]);
        sink.push_frame(FrameIndex(1), &frame).unwrap();
        assert!(sink.push_frame(FrameIndex(1), &frame).is_err());
        let wrong = FrameRGBA::solid(2, 2, [0, 0, 0, 255]);
        assert!(sink.push_frame(FrameIndex(2), &wrong).is_err());
    }

    #[test]
    fn cancelled_encode_gives_up() {
        let token = CancellationToken::new();
        let mut sink = GifSink::new();
        sink.set_cancel_token(token.clone());
        sink.begin(cfg(4, 4)).unwrap();
        sink.push_frame(FrameIndex(0), &FrameRGBA::solid(4, 4, [0, 0, 0, 255]))
            .unwrap();
        token.cancel();
        let err = sink.end().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Encoding);
    }

    #[test]
    fn empty_capture_is_an_encoding_error() {
        let mut sink = GifSink::new();
        sink.begin(cfg(4, 4)).unwrap();
        let err = sink.end().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Encoding);
    }
}

//! Frame, resolution and frame-period primitives.

use std::time::Duration;

use crate::foundation::error::{CaptureError, CaptureResult};

/// 0-based index of a sampled frame within one capture session.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Pixel dimensions of a rendering surface or an output artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a validated, non-empty resolution.
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::config("resolution width/height must be non-zero"));
        }
        Ok(Self { width, height })
    }

    /// Byte length of one RGBA8 frame at this size.
    pub fn rgba_len(self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One RGBA8 frame read from a rendering surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA8 pixels, `width * height * 4` bytes.
    pub data: Vec<u8>,
    /// Whether color channels are premultiplied by alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Frame filled with a single straight-alpha color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for _ in 0..(width as usize) * (height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
            premultiplied: false,
        }
    }

    /// Size of this frame.
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Check that `data` holds exactly `width * height` RGBA8 pixels.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::frame_capture("frame has zero width/height"));
        }
        if self.data.len() != self.resolution().rgba_len() {
            return Err(CaptureError::frame_capture(format!(
                "frame.data is {} bytes, expected {} for {}x{}",
                self.data.len(),
                self.resolution().rgba_len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Sampling period for `fps`, in fractional milliseconds.
pub fn frame_period_ms(fps: u32) -> f64 {
    1000.0 / f64::from(fps.max(1))
}

/// Sampling period for `fps`, truncated to whole nanoseconds.
pub fn frame_period(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
}

/// Index of the frame period that `elapsed` falls into.
pub fn slot_at(elapsed: Duration, fps: u32) -> u64 {
    (elapsed.as_nanos() / frame_period(fps).as_nanos()) as u64
}

/// Sampled time covered by `frames` ticks at `fps`, floored to whole milliseconds.
///
/// Integer arithmetic keeps this exact: `frames * 1000 / fps`.
pub fn sampled_time_ms(frames: u64, fps: u32) -> u64 {
    frames.saturating_mul(1000) / u64::from(fps.max(1))
}

/// Number of ticks needed for sampled time to reach `duration_ms` (ceil semantics).
pub fn frames_to_cover(duration_ms: u32, fps: u32) -> u64 {
    let num = u64::from(duration_ms) * u64::from(fps.max(1));
    num.div_ceil(1000)
}

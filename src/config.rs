//! Recording requests and pipeline options.

use std::time::Duration;

use crate::foundation::core::{Resolution, frame_period, frame_period_ms, frames_to_cover};
use crate::foundation::error::{CaptureError, CaptureResult};

/// Longest capture accepted, in milliseconds.
pub const MAX_DURATION_MS: u32 = 30_000;
/// Highest sampling rate accepted.
pub const MAX_FPS: u32 = 60;
/// GIF quality bounds (encoder sampling factor; lower is better).
pub const GIF_QUALITY_RANGE: std::ops::RangeInclusive<u32> = 1..=30;
/// GIF quality used when the config leaves it unset.
pub const DEFAULT_GIF_QUALITY: u32 = 10;
/// Video bitrate used when neither `bitrate` nor `quality` is given.
pub const DEFAULT_VIDEO_BITRATE: u32 = 5_000_000;

/// Output container of a capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Looping GIF, discrete-sample strategy.
    Gif,
    /// VP9 in WebM, continuous-stream strategy.
    Webm,
    /// H.264 in fragmented MP4, continuous-stream strategy.
    Mp4,
}

impl OutputFormat {
    /// Lowercase name, also the file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type of the produced artifact.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Gif => "image/gif",
            Self::Webm => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }

    /// `true` for formats produced by the continuous-stream strategy.
    pub fn is_video(self) -> bool {
        matches!(self, Self::Webm | Self::Mp4)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> CaptureResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gif" => Ok(Self::Gif),
            "webm" => Ok(Self::Webm),
            "mp4" => Ok(Self::Mp4),
            other => Err(CaptureError::config(format!(
                "unknown format '{other}' (expected gif, webm or mp4)"
            ))),
        }
    }
}

/// One capture request, as supplied by the collaborator.
///
/// Immutable once validated; the session keeps its own copy.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Caller-chosen identifier of the export.
    pub export_id: String,
    /// Capture length in milliseconds (`1..=30000`).
    #[serde(rename = "duration")]
    pub duration_ms: u32,
    /// Sampling rate (`1..=60`).
    pub fps: u32,
    /// Output container.
    pub format: OutputFormat,
    /// `1..=30` integer for gif (lower is better), `0.0..=1.0` for video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    /// Output width; frames are scaled when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Output height; frames are scaled when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Bits per second; video formats only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
}

impl RecordingConfig {
    /// Request with no quality, size or bitrate hints.
    pub fn new(
        export_id: impl Into<String>,
        duration_ms: u32,
        fps: u32,
        format: OutputFormat,
    ) -> Self {
        Self {
            export_id: export_id.into(),
            duration_ms,
            fps,
            format,
            quality: None,
            width: None,
            height: None,
            bitrate: None,
        }
    }

    /// Set `quality`.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Scale output frames to `width x height`.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the video bitrate in bits per second.
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// Check every bound. Runs before any resource is touched.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.duration_ms == 0 || self.duration_ms > MAX_DURATION_MS {
            return Err(CaptureError::config(format!(
                "duration must be within 1..={MAX_DURATION_MS} ms, got {}",
                self.duration_ms
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CaptureError::config(format!(
                "fps must be within 1..={MAX_FPS}, got {}",
                self.fps
            )));
        }
        if let Some(q) = self.quality {
            if !q.is_finite() {
                return Err(CaptureError::config("quality must be a finite number"));
            }
            match self.format {
                OutputFormat::Gif => {
                    let lo = *GIF_QUALITY_RANGE.start() as f32;
                    let hi = *GIF_QUALITY_RANGE.end() as f32;
                    if q.fract() != 0.0 || q < lo || q > hi {
                        return Err(CaptureError::config(format!(
                            "gif quality must be an integer within 1..=30, got {q}"
                        )));
                    }
                }
                OutputFormat::Webm | OutputFormat::Mp4 => {
                    if !(0.0..=1.0).contains(&q) {
                        return Err(CaptureError::config(format!(
                            "video quality must be within 0.0..=1.0, got {q}"
                        )));
                    }
                }
            }
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(CaptureError::config("output width/height must be non-zero"));
        }
        if self.bitrate == Some(0) {
            return Err(CaptureError::config("bitrate must be non-zero"));
        }
        if self.bitrate.is_some() && !self.format.is_video() {
            tracing::warn!(export_id = %self.export_id, "bitrate is ignored for gif output");
        }
        Ok(())
    }

    /// Capture length as a `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }

    /// Sampling period as a `Duration` (nanosecond precision).
    pub fn frame_period(&self) -> Duration {
        frame_period(self.fps)
    }

    /// Sampling period in fractional milliseconds.
    pub fn frame_period_ms(&self) -> f64 {
        frame_period_ms(self.fps)
    }

    /// Frames the discrete-sample strategy produces for this config.
    pub fn expected_frames(&self) -> u64 {
        frames_to_cover(self.duration_ms, self.fps)
    }

    /// Effective GIF quality, defaulted and clamped to the encoder range.
    pub fn gif_quality(&self) -> u32 {
        self.quality
            .map(|q| q as u32)
            .unwrap_or(DEFAULT_GIF_QUALITY)
            .clamp(*GIF_QUALITY_RANGE.start(), *GIF_QUALITY_RANGE.end())
    }

    /// Output size for frames sampled from a surface of `source` size.
    ///
    /// A single given dimension keeps the source aspect ratio.
    pub fn output_resolution(&self, source: Resolution) -> Resolution {
        let scale = |num: u32, a: u32, b: u32| -> u32 {
            ((u64::from(num) * u64::from(a) + u64::from(b) / 2) / u64::from(b.max(1))).max(1) as u32
        };
        match (self.width, self.height) {
            (Some(w), Some(h)) => Resolution {
                width: w,
                height: h,
            },
            (Some(w), None) => Resolution {
                width: w,
                height: scale(w, source.height, source.width),
            },
            (None, Some(h)) => Resolution {
                width: scale(h, source.width, source.height),
                height: h,
            },
            (None, None) => source,
        }
    }
}

/// Runtime knobs of the capture pipeline.
#[derive(Clone, Debug)]
pub struct CaptureOptions {
    /// Added to the config duration to arm the timeout guard.
    pub safety_margin: Duration,
    /// Consecutive failed surface reads that escalate to a session failure.
    pub max_consecutive_failures: u32,
    /// Frames buffered between the sampling loop and the stream encoder thread.
    pub stream_channel_capacity: usize,
    /// Background color (straight RGBA8) used when flattening alpha.
    pub bg_rgba: [u8; 4],
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(10),
            max_consecutive_failures: 10,
            stream_channel_capacity: 8,
            bg_rgba: [255, 255, 255, 255],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gif(duration: u32, fps: u32) -> RecordingConfig {
        RecordingConfig::new("t", duration, fps, OutputFormat::Gif)
    }

    #[test]
    fn bounds_are_enforced() {
        assert!(gif(1, 1).validate().is_ok());
        assert!(gif(30_000, 60).validate().is_ok());
        assert!(gif(0, 10).validate().is_err());
        assert!(gif(50_000, 10).validate().is_err());
        assert!(gif(1000, 0).validate().is_err());
        assert!(gif(1000, 61).validate().is_err());
    }

    #[test]
    fn quality_depends_on_format() {
        assert!(gif(1000, 10).with_quality(1.0).validate().is_ok());
        assert!(gif(1000, 10).with_quality(30.0).validate().is_ok());
        assert!(gif(1000, 10).with_quality(0.5).validate().is_err());
        assert!(gif(1000, 10).with_quality(31.0).validate().is_err());

        let webm = RecordingConfig::new("t", 1000, 30, OutputFormat::Webm);
        assert!(webm.clone().with_quality(0.8).validate().is_ok());
        assert!(webm.with_quality(10.0).validate().is_err());
    }

    #[test]
    fn config_parses_camel_case_wire_shape() {
        let cfg: RecordingConfig = serde_json::from_str(
            r#"{"exportId":"t1","duration":1000,"fps":10,"format":"gif","quality":5}"#,
        )
        .unwrap();
        assert_eq!(cfg.export_id, "t1");
        assert_eq!(cfg.duration_ms, 1000);
        assert_eq!(cfg.format, OutputFormat::Gif);
        assert_eq!(cfg.gif_quality(), 5);
        assert_eq!(cfg.expected_frames(), 10);
    }

    #[test]
    fn output_resolution_keeps_aspect_for_single_dimension() {
        let src = Resolution {
            width: 200,
            height: 100,
        };
        let mut cfg = gif(1000, 10);
        assert_eq!(cfg.output_resolution(src), src);
        cfg.width = Some(100);
        assert_eq!(
            cfg.output_resolution(src),
            Resolution {
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
        assert!("avi".parse::<OutputFormat>().is_err());
    }
}

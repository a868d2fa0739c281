//! Self-contained pattern engine used by the CLI and for end-to-end runs without a host engine.
//!
//! [`PatternEngine`] and [`PatternSurface`] share one scene: the engine drives its clock and
//! variables, the surface rasterizes it on every read. The clock follows `tokio::time`, so the
//! pattern is deterministic under a paused test clock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::binding::{EngineInstance, ResetConfig};
use crate::foundation::core::{FrameRGBA, Resolution};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::surface::RenderingSurface;

/// Hue rotation in degrees (number).
pub const HUE_PATH: &str = "hue";
/// Invert colors (boolean).
pub const INVERTED_PATH: &str = "inverted";
/// Pattern mode, `0..MODE_COUNT` (number or selector).
pub const MODE_PATH: &str = "mode";
/// Title text (string). Stored, not drawn.
pub const TITLE_PATH: &str = "title";

/// Number of selectable pattern modes.
pub const MODE_COUNT: u32 = 3;

#[derive(Clone, Debug, Default)]
struct Clock {
    base: Duration,
    running_since: Option<Instant>,
}

impl Clock {
    fn now(&self) -> Duration {
        match self.running_since {
            Some(t0) => self.base + t0.elapsed(),
            None => self.base,
        }
    }
}

#[derive(Clone, Debug)]
struct Scene {
    clock: Clock,
    artboard: String,
    resolution: Resolution,
    hue: f32,
    inverted: bool,
    mode: u32,
    title: String,
    plays: u64,
}

impl Scene {
    fn new(resolution: Resolution) -> Self {
        Self {
            clock: Clock::default(),
            artboard: String::new(),
            resolution,
            hue: 200.0,
            inverted: false,
            mode: 0,
            title: String::new(),
            plays: 0,
        }
    }
}

type SharedScene = Arc<Mutex<Scene>>;

fn scene(shared: &SharedScene) -> MutexGuard<'_, Scene> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

/// Build a connected engine/surface pair.
pub fn pattern(
    selector: impl Into<String>,
    resolution: Resolution,
) -> (PatternEngine, PatternSurface) {
    let shared = Arc::new(Mutex::new(Scene::new(resolution)));
    (
        PatternEngine {
            scene: shared.clone(),
        },
        PatternSurface {
            selector: selector.into(),
            scene: shared,
        },
    )
}

/// Engine half of the demo pattern.
pub struct PatternEngine {
    scene: SharedScene,
}

impl PatternEngine {
    /// Current animation time.
    pub fn time(&self) -> Duration {
        scene(&self.scene).clock.now()
    }

    /// Composition of the last reset.
    pub fn artboard(&self) -> String {
        scene(&self.scene).artboard.clone()
    }

    /// Last title written.
    pub fn title(&self) -> String {
        scene(&self.scene).title.clone()
    }

    /// How many times playback was (re)started.
    pub fn play_count(&self) -> u64 {
        scene(&self.scene).plays
    }
}

impl EngineInstance for PatternEngine {
    fn play(&mut self, _state_machine: &str) -> CaptureResult<()> {
        let mut s = scene(&self.scene);
        if s.clock.running_since.is_none() {
            s.clock.running_since = Some(Instant::now());
            s.plays += 1;
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut s = scene(&self.scene);
        s.clock.base = s.clock.now();
        s.clock.running_since = None;
    }

    fn stop(&mut self) {
        scene(&self.scene).clock = Clock::default();
    }

    fn reset(&mut self, cfg: &ResetConfig) -> CaptureResult<()> {
        if cfg.artboard.is_empty() {
            return Err(CaptureError::binding("reset requires an artboard name"));
        }
        let mut s = scene(&self.scene);
        let resolution = s.resolution;
        *s = Scene::new(resolution);
        s.artboard = cfg.artboard.clone();
        if cfg.autoplay {
            s.clock.running_since = Some(Instant::now());
            s.plays += 1;
        }
        Ok(())
    }

    fn set_string(&mut self, path: &str, value: &str) -> CaptureResult<()> {
        match path {
            TITLE_PATH => {
                scene(&self.scene).title = value.to_string();
                Ok(())
            }
            other => Err(unknown_path(other, "string")),
        }
    }

    fn set_number(&mut self, path: &str, value: f32) -> CaptureResult<()> {
        let mut s = scene(&self.scene);
        match path {
            HUE_PATH => s.hue = value.rem_euclid(360.0),
            MODE_PATH => {
                if value < 0.0 || value >= MODE_COUNT as f32 {
                    return Err(CaptureError::binding(format!(
                        "mode {value} out of range 0..{MODE_COUNT}"
                    )));
                }
                s.mode = value as u32;
            }
            other => return Err(unknown_path(other, "number")),
        }
        Ok(())
    }

    fn set_boolean(&mut self, path: &str, value: bool) -> CaptureResult<()> {
        match path {
            INVERTED_PATH => {
                scene(&self.scene).inverted = value;
                Ok(())
            }
            other => Err(unknown_path(other, "boolean")),
        }
    }
}

fn unknown_path(path: &str, kind: &str) -> CaptureError {
    CaptureError::binding(format!("no {kind} value at path '{path}'"))
}

/// Surface half of the demo pattern; rasterizes the scene on every read.
pub struct PatternSurface {
    selector: String,
    scene: SharedScene,
}

#[async_trait::async_trait]
impl RenderingSurface for PatternSurface {
    fn selector(&self) -> &str {
        &self.selector
    }

    fn resolution(&self) -> Resolution {
        scene(&self.scene).resolution
    }

    fn resize(&self, resolution: Resolution) {
        scene(&self.scene).resolution = resolution;
    }

    async fn capture_frame(&self) -> CaptureResult<FrameRGBA> {
        let s = scene(&self.scene).clone();
        Ok(rasterize(&s))
    }
}

fn rasterize(s: &Scene) -> FrameRGBA {
    let Resolution { width, height } = s.resolution;
    let t = s.clock.now().as_secs_f32();
    let base = hsv_to_rgb(s.hue + t * 60.0, 0.75, 0.95);
    let accent = hsv_to_rgb(s.hue + 180.0 + t * 60.0, 0.75, 0.55);
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let max_r = cx.hypot(cy).max(1.0);

    let mut data = Vec::with_capacity(s.resolution.rgba_len());
    for y in 0..height {
        for x in 0..width {
            let (fx, fy) = (x as f32, y as f32);
            let w = match s.mode {
                // Diagonal bands sliding over time.
                0 => ((fx + fy) / 16.0 - t * 4.0).sin() * 0.5 + 0.5,
                // Rings pulsing outwards.
                1 => ((fx - cx).hypot(fy - cy) / max_r * 12.0 - t * 6.0).sin() * 0.5 + 0.5,
                _ => {
                    let shift = (t * 16.0) as u32;
                    if ((x + shift) / 16 + y / 16) % 2 == 0 { 1.0 } else { 0.0 }
                }
            };
            for (b, a) in base.iter().zip(accent.iter()) {
                let v = f32::from(*b) * w + f32::from(*a) * (1.0 - w);
                let v = v.round().clamp(0.0, 255.0) as u8;
                data.push(if s.inverted { 255 - v } else { v });
            }
            data.push(255);
        }
    }

    FrameRGBA {
        width,
        height,
        data,
        premultiplied: false,
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let h = h.rem_euclid(360.0) / 60.0;
    let c = v * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r, g, b].map(|ch| ((ch + m) * 255.0).round().clamp(0.0, 255.0) as u8)
}

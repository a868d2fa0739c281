//! The rendering surface seam.

use std::sync::Arc;

use crate::foundation::core::{FrameRGBA, Resolution};
use crate::foundation::error::CaptureResult;

/// Externally-owned pixel buffer an engine draws into.
///
/// The capture pipeline only reads from it; it never creates or destroys one. Reads are async so
/// a surface backed by a GPU readback or a frozen host can stall without blocking the runtime.
#[async_trait::async_trait]
pub trait RenderingSurface: Send + Sync {
    /// Stable selector the surface is known by (for diagnostics).
    fn selector(&self) -> &str;

    /// Current displayed size.
    fn resolution(&self) -> Resolution;

    /// Change the displayed size. Called on resolution switches.
    fn resize(&self, resolution: Resolution);

    /// Read the current pixel contents.
    async fn capture_frame(&self) -> CaptureResult<FrameRGBA>;
}

/// Shared handle to an attached surface.
pub type SurfaceHandle = Arc<dyn RenderingSurface>;

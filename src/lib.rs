//! Deterministic capture of parametrized animations into GIF, WebM and MP4 artifacts.
//!
//! The crate drives an externally owned animation engine and rendering surface through one
//! bounded capture session at a time:
//!
//! - Bind template variables onto the engine with an [`EngineBindingAdapter`]
//! - Start a capture through a [`Recorder`] with a validated [`RecordingConfig`]
//! - Observe [`RecordingStatus`] updates and await the single [`RecordingResult`]
//!
//! GIF output samples the surface once per frame period and times the capture by tick count.
//! Video output streams frames into system `ffmpeg` and times the capture by wall clock.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub mod binding;
pub mod config;
pub mod demo;
/// Encoding sinks.
pub mod encode;
pub mod recorder;
pub mod result;
pub mod session;
/// Frame source strategies.
pub mod source;
pub mod status;
pub mod surface;

pub use crate::foundation::core::{FrameIndex, FrameRGBA, Resolution};
pub use crate::foundation::error::{CaptureError, CaptureResult, ErrorKind};

pub use crate::binding::{
    EngineBindingAdapter, EngineInstance, ResetConfig, SharedEngine, VariableBinding,
    VariableKind, VariableValue, shared,
};
pub use crate::config::{CaptureOptions, OutputFormat, RecordingConfig};
pub use crate::encode::ffmpeg::{FfmpegSink, is_ffmpeg_on_path};
pub use crate::encode::gif::GifSink;
pub use crate::encode::sink::{FrameSink, InMemorySink, RecordedFrames, SinkConfig};
pub use crate::recorder::{Recorder, RecordingHandle};
pub use crate::result::{ExportDescriptor, RecordingResult};
pub use crate::session::{CaptureState, SessionGuard, SessionLock};
pub use crate::source::{DefaultSinks, EncodeTask, FrameSource, SinkFactory, SourceKind};
pub use crate::status::{RecordingStatus, StatusCallback, StatusReceiver};
pub use crate::surface::{RenderingSurface, SurfaceHandle};

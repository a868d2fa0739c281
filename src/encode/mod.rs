//! Encoding sinks.
//!
//! Sinks consume prepared frames in capture order and seal them into a container byte buffer.

/// `ffmpeg`-based muxed video output (WebM/MP4 via system `ffmpeg`).
pub mod ffmpeg;
/// Looping GIF output.
pub mod gif;
/// Alpha flattening and output scaling.
pub mod pixels;
/// Generic frame sink trait and built-in sinks.
pub mod sink;

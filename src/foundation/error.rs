//! Error taxonomy of the capture pipeline.

/// Crate-wide result alias.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Error kinds surfaced by the capture pipeline.
///
/// Every failed recording carries one of these, both typed (`RecordingResult::error_kind`) and
/// rendered as the prefix of `RecordingResult::error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Out-of-range or inconsistent recording configuration.
    ConfigValidation,
    /// A capture session is already active.
    ConcurrentRecording,
    /// No rendering surface is attached.
    SurfaceNotFound,
    /// Reading pixels from the surface failed.
    FrameCapture,
    /// The image-sequence or stream encoder failed.
    Encoding,
    /// Duration plus safety margin elapsed without natural completion.
    Timeout,
    /// A variable binding could not be applied.
    Binding,
    /// The engine is owned by an active capture session.
    Busy,
    /// Anything else (I/O, task failures).
    Internal,
}

impl ErrorKind {
    /// Stable name used in `RecordingResult::error` strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigValidation => "ConfigValidationError",
            Self::ConcurrentRecording => "ConcurrentRecordingError",
            Self::SurfaceNotFound => "SurfaceNotFoundError",
            Self::FrameCapture => "FrameCaptureError",
            Self::Encoding => "EncodingError",
            Self::Timeout => "TimeoutError",
            Self::Binding => "BindingError",
            Self::Busy => "BusyError",
            Self::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type of the capture pipeline. One variant per [`ErrorKind`].
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// Config values are out of range.
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// A session is already active.
    #[error("concurrent recording error: {0}")]
    ConcurrentRecording(String),

    /// Rendering surface missing at `Preparing`.
    #[error("surface not found: {0}")]
    SurfaceNotFound(String),

    /// One sample could not be read.
    #[error("frame capture error: {0}")]
    FrameCapture(String),

    /// Encoder or muxer failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The timeout guard fired.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Variable binding failure.
    #[error("binding error: {0}")]
    Binding(String),

    /// Engine owned by an active capture.
    #[error("engine busy: {0}")]
    Busy(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// [`CaptureError::ConfigValidation`] with `msg`.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// [`CaptureError::ConcurrentRecording`] with `msg`.
    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentRecording(msg.into())
    }

    /// [`CaptureError::SurfaceNotFound`] with `msg`.
    pub fn surface_not_found(msg: impl Into<String>) -> Self {
        Self::SurfaceNotFound(msg.into())
    }

    /// [`CaptureError::FrameCapture`] with `msg`.
    pub fn frame_capture(msg: impl Into<String>) -> Self {
        Self::FrameCapture(msg.into())
    }

    /// [`CaptureError::Encoding`] with `msg`.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// [`CaptureError::Timeout`] with `msg`.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// [`CaptureError::Binding`] with `msg`.
    pub fn binding(msg: impl Into<String>) -> Self {
        Self::Binding(msg.into())
    }

    /// [`CaptureError::Busy`] with `msg`.
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigValidation(_) => ErrorKind::ConfigValidation,
            Self::ConcurrentRecording(_) => ErrorKind::ConcurrentRecording,
            Self::SurfaceNotFound(_) => ErrorKind::SurfaceNotFound,
            Self::FrameCapture(_) => ErrorKind::FrameCapture,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Binding(_) => ErrorKind::Binding,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// `"<Kind>: <message>"`, the shape carried by `RecordingResult::error`.
    pub fn to_result_string(&self) -> String {
        let msg = match self {
            Self::ConfigValidation(m)
            | Self::ConcurrentRecording(m)
            | Self::SurfaceNotFound(m)
            | Self::FrameCapture(m)
            | Self::Encoding(m)
            | Self::Timeout(m)
            | Self::Binding(m)
            | Self::Busy(m) => m.clone(),
            Self::Other(e) => format!("{e:#}"),
        };
        format!("{}: {msg}", self.kind())
    }
}

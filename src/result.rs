//! Recording outcomes and the export descriptor.

use tokio::sync::oneshot;

use crate::config::{OutputFormat, RecordingConfig};
use crate::foundation::error::{CaptureError, ErrorKind};

/// Outcome of one capture request. Exactly one of `data`/`error` is set.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    /// Whether `data` holds a finished artifact.
    pub success: bool,
    /// Encoded container bytes. Not serialized; ship them separately.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    /// `"<Kind>: <message>"` on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Typed kind of `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Requested output format.
    pub format: OutputFormat,
    /// Byte length of `data` (0 on failure).
    pub size: usize,
    /// Captured time in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl RecordingResult {
    /// Successful result carrying `data`.
    pub fn completed(format: OutputFormat, data: Vec<u8>, duration_ms: u64) -> Self {
        Self {
            success: true,
            size: data.len(),
            data: Some(data),
            error: None,
            error_kind: None,
            format,
            duration_ms,
        }
    }

    /// Failed result carrying `err`.
    pub fn failed(format: OutputFormat, err: &CaptureError, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_result_string()),
            error_kind: Some(err.kind()),
            format,
            size: 0,
            duration_ms,
        }
    }

    /// Metadata the upload collaborator sends alongside `data`.
    pub fn descriptor(&self, cfg: &RecordingConfig) -> Option<ExportDescriptor> {
        if !self.success {
            return None;
        }
        Some(ExportDescriptor {
            export_id: cfg.export_id.clone(),
            format: self.format,
            duration_ms: self.duration_ms,
            fps: cfg.fps,
            size: self.size,
            mime_type: self.format.mime_type().to_string(),
            file_name: format!("{}.{}", cfg.export_id, self.format.as_str()),
        })
    }
}

/// Multipart fields of the artifact upload (`file` travels separately).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDescriptor {
    /// Export id from the request.
    pub export_id: String,
    /// Artifact format.
    pub format: OutputFormat,
    /// Captured time in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Requested sampling rate.
    pub fps: u32,
    /// Artifact size in bytes.
    pub size: usize,
    /// Artifact MIME type.
    pub mime_type: String,
    /// Suggested file name, `<exportId>.<format>`.
    pub file_name: String,
}

/// Resolving side of a pending recording. Resolves at most once.
pub(crate) struct ResultSlot {
    tx: Option<oneshot::Sender<RecordingResult>>,
}

impl ResultSlot {
    pub(crate) fn new() -> (Self, oneshot::Receiver<RecordingResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Resolve the pending result. Returns `false` if it was already resolved.
    pub(crate) fn resolve(&mut self, result: RecordingResult) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The caller may have dropped its handle; the result is still recorded elsewhere.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_of_data_or_error() {
        let ok = RecordingResult::completed(OutputFormat::Gif, vec![1, 2, 3], 1000);
        assert!(ok.success && ok.data.is_some() && ok.error.is_none());
        assert_eq!(ok.size, 3);

        let err = CaptureError::timeout("stalled");
        let bad = RecordingResult::failed(OutputFormat::Gif, &err, 0);
        assert!(!bad.success && bad.data.is_none());
        assert_eq!(bad.error.as_deref(), Some("TimeoutError: stalled"));
        assert_eq!(bad.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn descriptor_carries_upload_fields() {
        let cfg = RecordingConfig::new("t1", 1000, 10, OutputFormat::Webm);
        let ok = RecordingResult::completed(OutputFormat::Webm, vec![0; 42], 1003);
        let d = ok.descriptor(&cfg).unwrap();
        assert_eq!(d.file_name, "t1.webm");
        assert_eq!(d.mime_type, "video/webm");
        assert_eq!(d.size, 42);

        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["exportId"], "t1");
        assert_eq!(json["duration"], 1003);
    }

    #[test]
    fn slot_resolves_once() {
        let (mut slot, mut rx) = ResultSlot::new();
        let r = RecordingResult::completed(OutputFormat::Gif, vec![1], 100);
        assert!(slot.resolve(r.clone()));
        assert!(!slot.resolve(r.clone()));
        assert_eq!(rx.try_recv().unwrap(), r);
    }
}

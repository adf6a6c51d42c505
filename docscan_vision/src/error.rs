// THEORY:
// A single error type for the whole engine. Most of what can go "wrong" in a live
// scanner is not an error at all (no quad this frame, a degenerate quad, an empty
// detector result) and never reaches this enum. What remains are the failures a
// caller can act on: a broken configuration, a capture device that could not
// deliver, a still that could not be decoded, or a frame with no pixels.

use thiserror::Error;

/// Failures surfaced by the scanning engine.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The frame has no pixels and cannot be filtered or rendered.
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    /// A configuration value is out of range or inconsistent with another one.
    #[error("invalid configuration for `{field}`: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    /// The still-capture device was unavailable or failed mid-capture.
    #[error("capture device failure: {0}")]
    Device(String),

    /// The still returned by the device could not be decoded.
    #[error("failed to decode still image: {0}")]
    Decode(#[from] image::ImageError),

    /// A scanner was built outside of a tokio runtime.
    #[error("no tokio runtime available; build the scanner from within a runtime")]
    NoRuntime,

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// A configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub(crate) fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

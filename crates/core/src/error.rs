/// Result alias that carries the custom [`CompositorError`] type.
pub type Result<T> = std::result::Result<T, CompositorError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// A capture device could not be acquired. The compositor keeps running
    /// without audio reactivity.
    #[error("capture acquisition failed: {0}")]
    Acquisition(#[from] CaptureError),
    /// A media source failed to load or decode.
    #[error("failed to decode `{url}`: {reason}")]
    Decode { url: String, reason: String },
    /// Surface, program or texture setup failed. Fatal to the frame loop.
    #[error("graphics initialization failed: {0}")]
    Initialization(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("media catalog is empty")]
    EmptyCatalog,
    #[error("media index {index} is out of range for a catalog of {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl CompositorError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Whether the error must stop the frame loop rather than being logged
    /// and skipped for the current frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Initialization(_))
    }
}

impl From<&str> for CompositorError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CompositorError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Reasons a camera or display capture request can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no matching capture device")]
    NotFound,
    #[error("{0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_initialization_errors_are_fatal() {
        assert!(CompositorError::Initialization("link failed".into()).is_fatal());
        assert!(!CompositorError::Decode {
            url: "a.mp4".into(),
            reason: "bad header".into(),
        }
        .is_fatal());
        assert!(!CompositorError::from(CaptureError::PermissionDenied).is_fatal());
    }

    #[test]
    fn decode_error_mentions_url() {
        let err = CompositorError::Decode {
            url: "clip.mp4".into(),
            reason: "unsupported codec".into(),
        };
        let text = err.to_string();
        assert!(text.contains("clip.mp4"));
        assert!(text.contains("unsupported codec"));
    }
}

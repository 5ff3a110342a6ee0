/// Result alias that carries the custom [`MicVizError`] type.
pub type Result<T> = std::result::Result<T, MicVizError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MicVizError {
    /// The visualizer could not be constructed from the supplied parameters.
    /// Fatal: no instance is returned.
    #[error("invalid visualizer configuration: {0}")]
    Config(String),
    /// Acquiring an input device failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// The processing graph between the device and the renderer could not be
    /// built.
    #[error("processing graph error: {0}")]
    Graph(String),
    /// Free-form failure, mostly poisoned locks.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be parsed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl MicVizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn graph<T: Into<String>>(msg: T) -> Self {
        Self::Graph(msg.into())
    }
}

impl From<&str> for MicVizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MicVizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Recoverable capture acquisition failures.
///
/// These never escape `start()` synchronously. They are delivered to
/// subscribers as a `deviceError` event and leave the visualizer state as it
/// was, so the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The host has no capture capability at all.
    #[error("audio capture unavailable: {0}")]
    Unavailable(String),
    /// The user or the operating system refused access to the device.
    #[error("audio capture denied: {0}")]
    Denied(String),
    /// The device exists but could not be opened or started.
    #[error("audio capture failed: {0}")]
    Failed(String),
    /// The capture source dropped the request without answering it.
    #[error("audio capture request was abandoned without a result")]
    Abandoned,
}

impl CaptureError {
    pub fn unavailable<T: Into<String>>(reason: T) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn denied<T: Into<String>>(reason: T) -> Self {
        Self::Denied(reason.into())
    }

    pub fn failed<T: Into<String>>(reason: T) -> Self {
        Self::Failed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_convert_into_crate_error() {
        let err: MicVizError = CaptureError::denied("user dismissed prompt").into();
        assert!(matches!(err, MicVizError::Capture(CaptureError::Denied(_))));
        assert_eq!(err.to_string(), "audio capture denied: user dismissed prompt");
    }

    #[test]
    fn config_error_mentions_reason() {
        let err = MicVizError::config("no renderer provided");
        assert_eq!(
            err.to_string(),
            "invalid visualizer configuration: no renderer provided"
        );
    }
}

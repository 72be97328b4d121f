//! Error taxonomy for the analysis pipeline.
//!
//! Every failure the pipeline can surface maps to one [`AnalysisError`]
//! variant. The variant's [`ErrorKind`] is what travels over the progress
//! channel (`"type"` field of an `error` event), so consumers can tell a
//! timed-out generation call from an empty repository without parsing
//! messages.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Main error type for the analysis pipeline.
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    /// Content could not be chunked (e.g. not valid UTF-8 text).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A generation call exceeded its client-side deadline.
    #[error("Analysis timeout after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// Connection failure, non-2xx status, or malformed response body.
    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Filtering left nothing to analyze.
    #[error("No supported source files found in {repository}")]
    NoSupportedFiles { repository: String },

    /// Every retained file failed to fetch or process.
    #[error("No files were successfully analyzed")]
    NothingAnalyzed,

    /// The consumer went away; further work was abandoned.
    #[error("Analysis cancelled")]
    Cancelled,

    /// Uncaught orchestration-level failure.
    #[error("{0}")]
    System(String),
}

/// Wire-level classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Timeout,
    TransportError,
    NoSupportedFiles,
    Cancelled,
    SystemError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::NoSupportedFiles => "no_supported_files",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::SystemError => "system_error",
        }
    }
}

impl AnalysisError {
    pub fn transport(message: impl Into<String>) -> Self {
        AnalysisError::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::InvalidInput(_) => ErrorKind::InvalidInput,
            AnalysisError::Timeout { .. } => ErrorKind::Timeout,
            AnalysisError::Transport { .. } => ErrorKind::TransportError,
            AnalysisError::NoSupportedFiles { .. } => ErrorKind::NoSupportedFiles,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::NothingAnalyzed | AnalysisError::System(_) => ErrorKind::SystemError,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Input validation and cancellation are final; everything that went
    /// over the network is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::Timeout { .. } | AnalysisError::Transport { .. }
        )
    }
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::System(format!("{:#}", err))
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_names() {
        assert_eq!(
            AnalysisError::InvalidInput("x".into()).kind().as_str(),
            "invalid_input"
        );
        assert_eq!(
            AnalysisError::NothingAnalyzed.kind(),
            ErrorKind::SystemError
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::NoSupportedFiles).unwrap(),
            serde_json::json!("no_supported_files")
        );
    }

    #[test]
    fn only_network_failures_retry() {
        assert!(AnalysisError::transport("refused").is_retryable());
        assert!(AnalysisError::Timeout {
            after: Duration::from_secs(60)
        }
        .is_retryable());
        assert!(!AnalysisError::InvalidInput("bad".into()).is_retryable());
        assert!(!AnalysisError::Cancelled.is_retryable());
    }

    #[test]
    fn timeout_message_mentions_deadline() {
        let err = AnalysisError::Timeout {
            after: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "Analysis timeout after 120s");
    }
}

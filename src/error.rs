/// Error types for the inferload crate.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors detected while assembling a run. All of these are fatal and
/// surface before any traffic is generated.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid request rate {0} (must be > 0)")]
    InvalidRate(f64),

    #[error("Invalid coefficient of variation {0} (must be >= 0)")]
    InvalidCv(f64),

    #[error("Invalid scale factor {0} (must be > 0)")]
    InvalidScaleFactor(f64),

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("Run duration must be non-zero")]
    InvalidDuration,

    #[error("Failed to open trace file {path}: {source}")]
    TraceOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed trace record at line {line}: {reason}")]
    TraceRecord { line: usize, reason: String },

    #[error("Trace file {0} contains no records")]
    EmptyTrace(PathBuf),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Per-request failures. Contained within the worker that owns the
/// request and recorded in its sample; never aborts the run.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("No response data within {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response stream: {0}")]
    Stream(String),
}

impl RequestError {
    /// Short, stable tag used for failure bucketing in the report.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Connect(_) => "connect",
            RequestError::Timeout(_) => "timeout",
            RequestError::Api { .. } => "api",
            RequestError::Stream(_) => "stream",
        }
    }
}

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_kinds_are_stable() {
        assert_eq!(RequestError::Connect("refused".into()).kind(), "connect");
        assert_eq!(
            RequestError::Timeout(Duration::from_secs(2)).kind(),
            "timeout"
        );
        assert_eq!(
            RequestError::Api {
                status: 500,
                message: "boom".into()
            }
            .kind(),
            "api"
        );
        assert_eq!(RequestError::Stream("truncated".into()).kind(), "stream");
    }

    #[test]
    fn config_error_wraps_into_app_error() {
        let err: AppError = ConfigError::InvalidRate(0.0).into();
        assert!(matches!(err, AppError::Config(_)));
    }
}

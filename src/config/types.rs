/// Error taxonomy and shared result types for examguard
use std::time::Duration;
use thiserror::Error;

/// Failure of a single probe's underlying query.
///
/// `Timeout` and `ToolMissing` are read as negative results by every probe.
/// `Execution` is surfaced or swallowed according to the probe's
/// [`FailurePolicy`](crate::probe::FailurePolicy).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{tool} did not answer within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} is not installed")]
    ToolMissing { tool: String },

    #[error("{tool} failed: {detail}")]
    Execution { tool: String, detail: String },

    #[error("I/O error while probing: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err.to_string())
    }
}

impl ProbeError {
    pub fn execution(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        ProbeError::Execution {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Timeouts and absent tooling never count as evidence either way.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            ProbeError::Timeout { .. } | ProbeError::ToolMissing { .. }
        )
    }
}

/// Failure of the external object-detection capability.
/// Every variant degrades the classifier to its audio/window channels.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("object detector unavailable: {0}")]
    Unavailable(String),

    #[error("object detector did not answer within {0:?}")]
    Timeout(Duration),

    #[error("object detector returned malformed output: {0}")]
    Malformed(String),
}

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GuardError {
    /// Errors caused by the caller's input rather than by this process.
    pub fn is_client_error(&self) -> bool {
        matches!(self, GuardError::MalformedObservation(_))
    }

    /// Exit code used by the CLI when surfacing this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GuardError::MalformedObservation(_) => 2,
            GuardError::Config(_) => 78,
            GuardError::Store(_) | GuardError::Io(_) => 74,
            GuardError::Json(_) => 65,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_probe_errors() {
        let timeout = ProbeError::Timeout {
            tool: "sysctl".to_string(),
            timeout: Duration::from_secs(3),
        };
        let missing = ProbeError::ToolMissing {
            tool: "wmic".to_string(),
        };
        let failed = ProbeError::execution("systemd-detect-virt", "exit status 2");

        assert!(timeout.is_negative());
        assert!(missing.is_negative());
        assert!(!failed.is_negative());
    }

    #[test]
    fn test_only_malformed_input_is_client_error() {
        assert!(GuardError::MalformedObservation("empty".into()).is_client_error());
        assert!(!GuardError::Store("poisoned".into()).is_client_error());
        assert_eq!(GuardError::MalformedObservation("x".into()).exit_code(), 2);
    }
}

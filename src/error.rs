//! Error kinds surfaced by the session orchestrator.
//!
//! Every variant carries the name of the failing operation (or the
//! interface / path it concerns) plus a human-readable reason.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A logical interface could not be mapped to a reserved physical port.
    #[error("load_configuration: cannot bind interface {interface}: {reason}")]
    Binding { interface: u32, reason: String },

    /// Operation invoked in the wrong lifecycle state.
    #[error("{operation}: {reason}")]
    Sequence {
        operation: &'static str,
        reason: String,
    },

    /// Failure reported by the traffic generator, the artifact store or the
    /// reservation registry.
    #[error("{operation} failed: {message}")]
    RemoteOperation { operation: String, message: String },

    #[error("{operation}: unsupported output format '{format}', supported csv or json only")]
    Format {
        operation: &'static str,
        format: String,
    },

    #[error("{operation} timed out after {polls} polls ({elapsed:?})")]
    Timeout {
        operation: &'static str,
        polls: u32,
        elapsed: Duration,
    },

    #[error("cannot load test descriptor {}: {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn sequence(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Sequence {
            operation,
            reason: reason.into(),
        }
    }

    pub fn remote(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::RemoteOperation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable tag used by the command API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binding { .. } => "binding",
            Self::Sequence { .. } => "sequence",
            Self::RemoteOperation { .. } => "remote_operation",
            Self::Format { .. } => "format",
            Self::Timeout { .. } => "timeout",
            Self::Descriptor { .. } => "descriptor",
            Self::Persist { .. } => "persist",
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operation() {
        let err = SessionError::sequence("stop_traffic", "test id not defined, run the test first");
        assert_eq!(
            err.to_string(),
            "stop_traffic: test id not defined, run the test first"
        );

        let err = SessionError::remote("start_run", "HTTP 500: busy");
        assert_eq!(err.to_string(), "start_run failed: HTTP 500: busy");
        assert_eq!(err.kind(), "remote_operation");

        let err = SessionError::Binding {
            interface: 4,
            reason: "interface is not part of the test network".into(),
        };
        assert_eq!(
            err.to_string(),
            "load_configuration: cannot bind interface 4: interface is not part of the test network"
        );
    }

    #[test]
    fn format_error_lists_supported_formats() {
        let err = SessionError::Format {
            operation: "get_statistics",
            format: "xml".into(),
        };
        assert!(err.to_string().contains("'xml'"));
        assert!(err.to_string().contains("csv or json"));
    }
}

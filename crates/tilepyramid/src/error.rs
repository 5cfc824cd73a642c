//! Error types for the tilepyramid crate.

use std::fmt;

/// Result type for tilepyramid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether a failed fetch should be remembered or retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The resource does not exist or can never be decoded; mark it absent.
    Permanent,
    /// The failure may clear up on its own; the tile is requested again later.
    Transient,
}

/// Errors that can occur in tilepyramid operations.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The host was recently marked unreachable and is not retried yet.
    HostUnreachable {
        /// Host name of the service.
        host: String,
    },
    /// Network retrieval is globally disabled.
    NetworkDisabled,
    /// Payload decoding failed.
    Decode(tilepyramid_decode::DecodeError),
    /// Disk cache I/O failed.
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Path involved in the operation.
        path: String,
        /// The error message.
        message: String,
    },
    /// Configuration is malformed or names an unknown delegate.
    Config {
        /// Description of what was wrong.
        detail: String,
    },
    /// Invalid data in a request or response.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// A background worker panicked or was cancelled.
    Worker {
        /// The error message.
        message: String,
    },
}

impl Error {
    /// Classify this error for the absent-resource policy.
    ///
    /// Missing resources (HTTP 400/403/404/410, no configured service) and
    /// undecodable payloads are permanent. Everything else, including I/O
    /// errors and unreachable hosts, is transient.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::HttpStatus { status, .. } if matches!(status, 400 | 403 | 404 | 410) => {
                FailureKind::Permanent
            }
            Error::Decode(_) | Error::InvalidData { .. } => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }

    pub(crate) fn io(operation: &'static str, path: &std::path::Path, e: &std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.display().to_string(),
            message: e.to_string(),
        }
    }

    pub(crate) fn config(detail: impl Into<String>) -> Self {
        Error::Config {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::HostUnreachable { host } => write!(f, "host {host} is unreachable"),
            Error::NetworkDisabled => write!(f, "network retrieval is disabled"),
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Io {
                operation,
                path,
                message,
            } => write!(f, "disk cache {operation} of {path} failed: {message}"),
            Error::Config { detail } => write!(f, "invalid configuration: {detail}"),
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::Worker { message } => write!(f, "worker failed: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tilepyramid_decode::DecodeError> for Error {
    fn from(e: tilepyramid_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config {
            detail: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Worker {
            message: e.to_string(),
        }
    }
}

//! Error types for transport operations

use reqwest::StatusCode;
use thiserror::Error;

use crate::task::TransferCancelled;
use crate::transport::ClientKind;

/// Coarse classification handed back to the resolver so it can pick a
/// retry/backoff policy at a higher layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote resource does not exist.
    NotFound,
    /// Any other failure.
    Other,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unsupported repository protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("Invalid repository URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("No client factory registered for the {0} protocol")]
    MissingClientFactory(ClientKind),

    #[error("Failed to set up {kind} client: {source}")]
    ClientSetup {
        kind: ClientKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// Non-2xx response. The message is the bare status code.
    #[error("{}", .status.as_u16())]
    HttpStatus { status: StatusCode, url: String },

    #[error("Request over {kind} timed out after {timeout_ms}ms for URL: {url}")]
    Timeout {
        kind: ClientKind,
        timeout_ms: u64,
        url: String,
    },

    /// The server refused the fast protocol before answering, for example a
    /// cleartext HTTP/1.1-only server rejecting the HTTP/2 preface.
    #[error("{kind} unavailable for URL {url}: {source}")]
    ProtocolUnavailable {
        kind: ClientKind,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Connection failed for URL {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request failed for URL {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected Content-Range for resumed download: {0}")]
    ContentRange(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transporter closed")]
    Closed,

    #[error("Failed to release transport resources: {}", .failures.join("; "))]
    Close { failures: Vec<String> },
}

impl TransportError {
    /// Map an error onto the two-value classification used by callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HttpStatus { status, .. }
                if matches!(*status, StatusCode::NOT_FOUND | StatusCode::GONE) =>
            {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Other,
        }
    }

    /// Whether the error is a response deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Failures that send a fast-protocol request to the fallback client:
    /// no response in time, or the protocol rejected outright.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ProtocolUnavailable { .. })
    }

    /// HTTP status carried by a response-level failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransferCancelled> for TransportError {
    fn from(_: TransferCancelled) -> Self {
        Self::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16) -> TransportError {
        TransportError::HttpStatus {
            status: StatusCode::from_u16(code).unwrap_or(StatusCode::IM_A_TEAPOT),
            url: "https://repo.example.com/a.jar".to_string(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(status_error(404).kind(), ErrorKind::NotFound);
        assert_eq!(status_error(410).kind(), ErrorKind::NotFound);
        assert_eq!(status_error(500).kind(), ErrorKind::Other);
        assert_eq!(status_error(401).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_status_message_is_code() {
        assert_eq!(status_error(404).to_string(), "404");
        assert_eq!(status_error(503).status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_non_response_errors_are_other() {
        let timeout = TransportError::Timeout {
            kind: ClientKind::Fallback,
            timeout_ms: 10,
            url: "http://localhost/".to_string(),
        };
        assert!(timeout.is_timeout());
        assert!(timeout.triggers_fallback());
        assert_eq!(timeout.kind(), ErrorKind::Other);
        assert_eq!(TransportError::Closed.kind(), ErrorKind::Other);
        assert_eq!(TransportError::Cancelled.kind(), ErrorKind::Other);
        assert!(!status_error(504).is_timeout());
        assert!(!status_error(504).triggers_fallback());
        assert!(!TransportError::Closed.triggers_fallback());
    }

    #[test]
    fn test_close_error_lists_failures() {
        let err = TransportError::Close {
            failures: vec!["fast: already stopped".to_string(), "proxy".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to release transport resources: fast: already stopped; proxy"
        );
    }
}

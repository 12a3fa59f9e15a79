//! Unified error type for switchyard.
//!
//! Every failure that crosses the submission boundary is folded into one
//! [`Error`] value. Besides the message, the HTTP-level variants carry:
//! - the status code (`0` when the failure is not an HTTP status),
//! - the target URI,
//! - a diagnostic string built from the request parameters or body (and the
//!   response body for status failures).
//!
//! Backends report their own failures through [`TransportFailure`], which the
//! submitters wrap into [`Error::Transport`].

use core::time::Duration;
use std::error::Error as StdError;

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Boxed error used for foreign causes.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Unified error type for all switchyard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was built with invalid input (blank parameter name, odd
    /// flat pair list, malformed URL, unknown charset, bad configuration value).
    ///
    /// Raised by the mutating call itself, before any network activity.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No usable transport backend could be constructed.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Connection, timeout, TLS or stream failure while talking to the server.
    #[error("{uri} : {diagnostic} ({source})")]
    Transport {
        /// Target URI
        uri: String,
        /// Request parameters or body, best effort
        diagnostic: String,
        /// Backend failure
        #[source]
        source: TransportFailure,
    },

    /// The server answered with a status code of 300 or above.
    #[error("{status} {uri} : {diagnostic}")]
    Status {
        /// HTTP status code
        status: StatusCode,
        /// Target URI
        uri: String,
        /// Request parameters or body followed by the response body, best effort
        diagnostic: String,
    },

    /// Serialising a request object or deserialising a response failed.
    #[error("codec error for {uri}: {source}")]
    Codec {
        /// Target URI
        uri: String,
        /// Request parameters or body, best effort
        diagnostic: String,
        /// Codec failure
        #[source]
        source: serde_json::Error,
    },

    /// Local file handling failed (file body, temporary response file).
    #[error("I/O error for {uri}: {source}")]
    Io {
        /// Target URI
        uri: String,
        /// Request parameters or body, best effort
        diagnostic: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A caller supplied stream handler failed.
    ///
    /// When the handler was processing an error, that error is kept in
    /// [`Error::suppressed`] instead of being dropped.
    #[error("response handler failed: {source}")]
    Handler {
        /// Error returned by the handler
        #[source]
        source: BoxError,
        /// Error the handler was given, if any
        suppressed: Option<Box<Error>>,
    },
}

/// Failure reported by a transport backend.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The connection could not be established (refused, DNS, unreachable).
    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),

    /// A connect or read deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// TLS handshake or certificate verification failed.
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// The connection broke while sending or receiving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected the encoded request (bad header, bad URI).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client was closed before the request was sent.
    #[error("client is closed")]
    Closed,

    /// Anything else the backend reported.
    #[error("{0}")]
    Other(#[source] BoxError),
}

impl TransportFailure {
    pub(crate) fn other(error: impl Into<BoxError>) -> Self {
        Self::Other(error.into())
    }
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn handler(source: anyhow::Error, suppressed: Option<Self>) -> Self {
        Self::Handler {
            source: source.into(),
            suppressed: suppressed.map(Box::new),
        }
    }

    /// HTTP status code of the failure, `0` when it is not an HTTP status.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Status { status, .. } => status.as_u16(),
            _ => 0,
        }
    }

    /// Target URI of the failed request, if the failure is tied to one.
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Transport { uri, .. }
            | Self::Status { uri, .. }
            | Self::Codec { uri, .. }
            | Self::Io { uri, .. } => Some(uri),
            Self::Handler {
                suppressed: Some(original),
                ..
            } => original.uri(),
            _ => None,
        }
    }

    /// Diagnostic text describing the request (and response, for status failures).
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Transport { diagnostic, .. }
            | Self::Status { diagnostic, .. }
            | Self::Codec { diagnostic, .. }
            | Self::Io { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    /// The error a failing error handler was given.
    pub fn suppressed(&self) -> Option<&Self> {
        match self {
            Self::Handler { suppressed, .. } => suppressed.as_deref(),
            _ => None,
        }
    }

    /// Check if this is a network transport error.
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if the transport gave up on a deadline.
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                source: TransportFailure::Timeout(_),
                ..
            }
        )
    }

    /// Check if this is a client error (4xx HTTP status).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if status.is_client_error())
    }

    /// Check if this is a server error (5xx HTTP status).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if status.is_server_error())
    }

    /// Get the error category.
    ///
    /// Useful for logging and monitoring.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnsupportedConfiguration(_) => ErrorKind::UnsupportedConfiguration,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Status { .. } => ErrorKind::Status,
            Self::Codec { .. } => ErrorKind::Codec,
            Self::Io { .. } => ErrorKind::Io,
            Self::Handler { .. } => ErrorKind::Handler,
        }
    }
}

/// Error category labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid request input
    Validation,
    /// No usable backend
    UnsupportedConfiguration,
    /// Transport/network error
    Transport,
    /// Non-success HTTP status
    Status,
    /// JSON codec error
    Codec,
    /// Local I/O error
    Io,
    /// Response handler error
    Handler,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::UnsupportedConfiguration => write!(f, "unsupported_configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Status => write!(f, "status"),
            Self::Codec => write!(f, "codec"),
            Self::Io => write!(f, "io"),
            Self::Handler => write!(f, "handler"),
        }
    }
}

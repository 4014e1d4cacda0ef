//! Error types

use crate::protocol::BackendError;
use std::io;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the client socket
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Client violated the wire protocol (malformed length, unexpected message, ...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed for a reason not tied to a wire response
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Error record that must be reported to the client before closing
    #[error("{0}")]
    Backend(BackendError),

    /// TLS handshake or TLS material error
    #[error("tls error: {0}")]
    Tls(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is a transport-level disconnect rather than an application error.
    ///
    /// Transport errors are treated as a normal end of the connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Tls(_) | Error::ConnectionClosed)
    }

    /// Error record to send to the client for this error, if any.
    ///
    /// Protocol violations become FATAL `08P01`; backend errors are sent as is;
    /// transport errors produce nothing since the socket is already unusable.
    pub fn to_backend_error(&self) -> Option<BackendError> {
        match self {
            Error::Backend(err) => Some(err.clone()),
            Error::Protocol(msg) => Some(BackendError::fatal(
                crate::protocol::sqlstate::PROTOCOL_VIOLATION,
                msg.clone(),
            )),
            Error::Authentication(msg) => Some(BackendError::fatal(
                crate::protocol::sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
                msg.clone(),
            )),
            Error::InvalidState { .. } | Error::Config(_) => Some(BackendError::fatal(
                crate::protocol::sqlstate::INTERNAL_ERROR,
                self.to_string(),
            )),
            Error::Io(_) | Error::Tls(_) | Error::ConnectionClosed => None,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::Backend(err)
    }
}

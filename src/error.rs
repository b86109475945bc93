//! Error types for the Consul client

use thiserror::Error;

/// Errors that can occur when talking to the Consul HTTP API
#[derive(Error, Debug)]
pub enum Error {
    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request did not complete before the deadline
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// The request context was canceled while the call was in flight
    #[error("Request canceled")]
    Canceled,

    /// The server answered with a non-2xx status
    #[error("Unexpected response (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        message: String,
    },

    /// The response body did not match the expected JSON shape
    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The request body could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// A session-dependent operation was attempted without a session
    #[error("{0}: no active session")]
    NoSession(String),

    /// The server no longer knows the session
    #[error("Session {0} has expired")]
    SessionExpired(String),

    /// The lock is held by another session
    #[error("Lock {0} is held by another session")]
    LockHeld(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request rejected locally before being sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status carried by a remote rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server answered 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The server answered 409
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// The server answered 403, usually an ACL denial
    pub fn is_permission_denied(&self) -> bool {
        self.status() == Some(403)
    }

    /// The server answered with a 5xx status
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// The failure means the server has no record of the session.
    ///
    /// Consul reports an unknown session on KV acquire/release as a 500 with an
    /// "invalid session" message, and on renew as a 404.
    pub fn is_session_invalid(&self) -> bool {
        match self {
            Error::SessionExpired(_) => true,
            Error::Status { status, message } => {
                let message = message.to_ascii_lowercase();
                message.contains("invalid session")
                    || (*status == 404 && message.contains("session"))
            }
            _ => false,
        }
    }

    /// Transport-level failure: connection, timeout or cancellation
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_) | Error::Canceled)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

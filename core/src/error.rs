//! Error types for the search client.
//!
//! # Design
//! Transience is a property of the error cause, not of the attempt that
//! produced it. `ApiError::is_transient` is the single place that decides
//! whether another host is worth trying: network failures always are, HTTP
//! errors only in the 5xx range, everything else never.
//!
//! `Cancelled` only comes out of the async surfaces, which must return
//! something once the caller's token fires. The continuation surface delivers
//! nothing instead.

use std::time::Duration;

use thiserror::Error;

use crate::classify::is_server_error;

/// Pseudo status reported for a body that is not valid JSON.
pub const ILL_FORMED_RESPONSE: u16 = 600;

/// Pseudo status reported for valid JSON that is not an object.
pub const INVALID_RESPONSE: u16 = 601;

/// A failure below HTTP: no response was received from the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// DNS resolution or TCP/TLS connection failure.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// Errors surfaced by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Invalid setup, such as an empty host pool or missing credentials.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The logical request itself is malformed (e.g. a body on a GET).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Network(#[from] TransportError),

    /// The server answered with a non-2xx status. `message` is taken from the
    /// `"message"` field of the JSON body when present.
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("no error message"))]
    HttpStatus {
        status: u16,
        message: Option<String>,
    },

    /// The response body could not be used as a JSON object.
    #[error("malformed response: {message}")]
    MalformedResponse { status: u16, message: String },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("request cancelled")]
    Cancelled,

    /// `Index::wait_task` gave up before the task was published.
    #[error("task {task_id} not published after {waited:?}")]
    TaskTimeout { task_id: u64, waited: Duration },
}

impl ApiError {
    /// Whether retrying the identical request on another host might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::HttpStatus { status, .. } => is_server_error(*status),
            _ => false,
        }
    }

    /// HTTP status, or the 600/601 pseudo status for malformed responses.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            ApiError::MalformedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided message for HTTP errors.
    pub fn message(&self) -> Option<&str> {
        match self {
            ApiError::HttpStatus { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

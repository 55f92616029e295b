//! Media error types
//!
//! `FetchFailed` is the single failure outcome of an authenticated fetch.
//! It is `Clone` because one network result is delivered to every caller
//! waiting on the same resource key.

use thiserror::Error;

/// Why an authenticated fetch produced no handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailed {
    /// Resource key was empty; no request was made
    #[error("Empty resource key")]
    EmptyKey,

    /// Backend did not accept the connection
    #[error("Backend unavailable")]
    Unavailable,

    /// Request exceeded the configured timeout
    #[error("Request timeout")]
    Timeout,

    /// Any other transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Response body could not be read
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request task ended without reporting an outcome
    #[error("Request abandoned")]
    Abandoned,
}

impl FetchFailed {
    /// Whether the backend reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchFailed::Status(404))
    }
}

impl From<reqwest::Error> for FetchFailed {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFailed::Timeout
        } else if err.is_connect() {
            FetchFailed::Unavailable
        } else if err.is_body() || err.is_decode() {
            FetchFailed::Decode(err.to_string())
        } else {
            FetchFailed::Transport(err.to_string())
        }
    }
}

/// Errors outside the fetch path (files, client setup)
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Selected file is not an image
    #[error("Not an image: {name} ({content_type})")]
    NotAnImage { name: String, content_type: String },

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Invalid backend base URL
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

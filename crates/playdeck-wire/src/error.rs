//! Error types for playdeck-wire

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpFailure;

/// Result type alias using playdeck-wire Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the playground endpoints
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered, but not with what we asked for
    #[error("{0}")]
    Status(Box<HttpFailure>),

    /// The response stream broke after it started
    #[error("Stream error: {0}")]
    Stream(String),

    /// No bytes arrived within the idle window
    #[error("Stream idle for {0:?}, giving up")]
    IdleTimeout(Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap a classified HTTP failure
    pub fn status(failure: HttpFailure) -> Self {
        Self::Status(Box::new(failure))
    }

    /// The structured HTTP failure, if this error carries one
    pub fn http_failure(&self) -> Option<&HttpFailure> {
        match self {
            Error::Status(failure) => Some(failure),
            _ => None,
        }
    }

    /// Check if the server answered with an HTML page instead of JSON/SSE
    pub fn is_html_failure(&self) -> bool {
        self.http_failure().is_some_and(|f| f.is_html)
    }

    /// Check if this error is an idle-read timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::IdleTimeout(_) => true,
            Error::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

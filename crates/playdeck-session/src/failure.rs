//! Structured description of a failed turn

use std::fmt;

use playdeck_wire::HttpFailure;
use serde::{Deserialize, Serialize};

/// What ended the turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection-level failure or a broken stream
    Transport,
    /// Non-2xx status, HTML page or non-JSON body
    Http,
    /// The server sent an `error` event
    Server,
    IdleTimeout,
    Cancelled,
    /// Too many automatic continuation steps
    StepLimit,
    /// The stream ended without a terminal event or any content
    Incomplete,
}

/// Stored in `TurnPhase::Failed` and broadcast to renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub message: String,
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpFailure>,
}

impl TurnFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, step: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            step,
            http: None,
        }
    }

    /// Classify a wire error that aborted `step`
    pub fn from_wire(error: &playdeck_wire::Error, step: u32) -> Self {
        if let Some(http) = error.http_failure() {
            return Self {
                kind: FailureKind::Http,
                message: http.summary(),
                step,
                http: Some(http.clone()),
            };
        }
        let kind = if error.is_timeout() {
            FailureKind::IdleTimeout
        } else {
            FailureKind::Transport
        };
        Self::new(kind, error.to_string(), step)
    }
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.step, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_wire_keeps_http_details() {
        let failure = HttpFailure::classify(
            500,
            "Internal Server Error",
            Some("text/html"),
            "<!doctype html><title>Server Error</title>",
        );
        let f = TurnFailure::from_wire(&playdeck_wire::Error::status(failure), 2);
        assert_eq!(f.kind, FailureKind::Http);
        assert_eq!(f.step, 2);
        let http = f.http.unwrap();
        assert!(http.is_html);
        assert_eq!(http.html_title.as_deref(), Some("Server Error"));
    }

    #[test]
    fn test_from_wire_timeout_and_transport() {
        let timeout = playdeck_wire::Error::IdleTimeout(Duration::from_secs(120));
        assert_eq!(
            TurnFailure::from_wire(&timeout, 1).kind,
            FailureKind::IdleTimeout
        );
        let broken = playdeck_wire::Error::Stream("connection reset".into());
        let f = TurnFailure::from_wire(&broken, 1);
        assert_eq!(f.kind, FailureKind::Transport);
        assert!(f.http.is_none());
    }
}

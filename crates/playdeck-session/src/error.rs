//! Error types for playdeck-session

use thiserror::Error;

/// Result type alias using playdeck-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
///
/// A turn that fails on the wire is not an error here: it ends in
/// `TurnPhase::Failed` and is reported through the turn outcome. These
/// errors mean the operation was refused or could not run at all.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer outside of a turn (e.g. clearing history)
    #[error(transparent)]
    Wire(#[from] playdeck_wire::Error),

    /// A turn is already streaming
    #[error("A turn is already in progress")]
    Busy,

    /// A paused turn must be resumed or abandoned first
    #[error("Waiting for input on the current turn; answer it or abandon it first")]
    AwaitingUserInput,

    /// Resume was requested but no turn is paused
    #[error("No paused turn to resume")]
    NothingToResume,

    /// A candidate number outside the offered list
    #[error("No candidate #{0}")]
    InvalidPick(usize),

    /// Writing the debug export failed
    #[error("Debug export failed: {0}")]
    Export(String),
}

impl Error {
    /// Check if the session refused the operation because of its current phase
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Error::Busy | Error::AwaitingUserInput | Error::NothingToResume
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_errors() {
        assert!(Error::Busy.is_guard());
        assert!(Error::AwaitingUserInput.is_guard());
        assert!(!Error::Export("disk full".into()).is_guard());
    }

    #[test]
    fn test_wire_error_is_transparent() {
        let e = Error::from(playdeck_wire::Error::Stream("reset".into()));
        assert_eq!(e.to_string(), "Stream error: reset");
    }
}

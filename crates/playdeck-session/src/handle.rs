//! A cloneable handle for cancelling a running turn from outside.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Cancel handle shared between a session and e.g. a Ctrl-C listener.
///
/// Cloning is cheap; every clone controls the same session.
#[derive(Clone, Default)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Cancel the step in flight, if any
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether a step is currently streaming
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Arm a fresh token for a new step and return it
    pub(crate) fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_running.store(true, Ordering::Release);
        token
    }

    pub(crate) fn disarm(&self) {
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_cancels_armed_token() {
        let handle = SessionHandle::new();
        let token = handle.arm();
        assert!(handle.is_running());
        handle.clone().abort();
        assert!(token.is_cancelled());

        let fresh = handle.arm();
        assert!(!fresh.is_cancelled());
        handle.disarm();
        assert!(!handle.is_running());
    }
}

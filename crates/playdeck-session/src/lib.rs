//! playdeck-session: turn orchestration for the tool playground
//!
//! This crate routes decoded envelopes to their owners (delta buffers, usage
//! tracker, tool ledger, debug recorder), drives the continuation state
//! machine across paused and multi-step turns, and broadcasts session events
//! to whatever renders them.

pub mod accumulators;
pub mod continuation;
pub mod error;
pub mod events;
pub mod failure;
pub mod handle;
pub mod ledger;
pub mod recorder;
pub mod router;
pub mod session;
pub mod tracker;
pub mod transport;

pub use accumulators::{DeltaBuffers, DeltaChannel};
pub use continuation::{ContinuationMachine, Terminal, TerminalOutcome, TurnPhase};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use failure::{FailureKind, TurnFailure};
pub use handle::SessionHandle;
pub use ledger::ToolLedger;
pub use recorder::{Clipboard, DebugExport, DebugRecorder, MemoryClipboard};
pub use router::EventRouter;
pub use session::{PlaygroundSession, SessionConfig};
pub use tracker::UsageTracker;
pub use transport::{HttpTransport, Transport};

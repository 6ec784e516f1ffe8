//! Session event types

use playdeck_wire::{ToolCallRecord, UsageSnapshot, UserInputPrompt};
use serde::{Deserialize, Serialize};

use crate::accumulators::DeltaChannel;
use crate::failure::TurnFailure;

/// Events emitted while a session runs turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A request for a step went out
    TurnStarted { step: u32, resumed: bool },

    /// Text appended to one of the delta buffers
    Delta { channel: DeltaChannel, delta: String },

    /// A tool finished on the server
    ToolExecuted(ToolCallRecord),

    /// The live usage snapshot was replaced
    UsageUpdated(UsageSnapshot),

    /// The turn is paused until the user answers
    AwaitingUserInput(UserInputPrompt),

    /// The turn finished with its final assistant content
    TurnCompleted { content: String },

    /// The turn failed
    TurnFailed(TurnFailure),

    /// Local and server-side history were cleared
    HistoryCleared,
}

impl SessionEvent {
    /// Check if this event ends a turn, or pauses it
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::AwaitingUserInput(_)
                | SessionEvent::TurnCompleted { .. }
                | SessionEvent::TurnFailed(_)
        )
    }
}

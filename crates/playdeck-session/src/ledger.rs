//! Bounded history of executed tools

use std::collections::VecDeque;

use playdeck_wire::{ToolCallRecord, ToolCallRef};

/// Records kept for the debug export
pub const LEDGER_CAPACITY: usize = 20;

/// Records shown in the tool panel
pub const DISPLAY_COUNT: usize = 5;

/// Ring buffer of the most recent tool executions.
///
/// A turn marker lets the session ask which tools ran during the current
/// logical turn without keeping a second list.
#[derive(Debug, Clone, Default)]
pub struct ToolLedger {
    records: VecDeque<ToolCallRecord>,
    pushed: u64,
    turn_mark: u64,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ToolCallRecord) {
        if self.records.len() >= LEDGER_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.pushed += 1;
    }

    /// The last `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<&ToolCallRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).collect()
    }

    /// Everything still held, oldest first
    pub fn export(&self) -> Vec<ToolCallRecord> {
        self.records.iter().cloned().collect()
    }

    /// Start counting tools for a new logical turn
    pub fn mark_turn(&mut self) {
        self.turn_mark = self.pushed;
    }

    /// Tools executed since the last [`mark_turn`](Self::mark_turn)
    pub fn turn_refs(&self) -> Vec<ToolCallRef> {
        let since = (self.pushed - self.turn_mark).min(self.records.len() as u64) as usize;
        self.records
            .iter()
            .skip(self.records.len() - since)
            .map(ToolCallRecord::to_ref)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.turn_mark = self.pushed;
    }
}

//! Dispatch of decoded envelopes to the components that own them

use std::collections::VecDeque;

use playdeck_wire::{
    CostBreakdown, DedupKey, RateTable, StreamEnvelope, ToolCallRecord, ToolCallRef,
    UsageSnapshot, WireEvent,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    accumulators::{DeltaBuffers, DeltaChannel},
    continuation::{ContinuationMachine, Terminal},
    events::SessionEvent,
    ledger::{LEDGER_CAPACITY, ToolLedger},
    recorder::{DebugExport, DebugRecorder, VisibleRecord},
    tracker::UsageTracker,
};

/// Visible (collapsed) records kept for display
pub const VISIBLE_LIMIT: usize = 120;

/// Routes envelopes in arrival order.
///
/// Each event type updates exactly one component. Terminal envelopes are
/// handed back to the caller for the continuation machine. Every envelope,
/// recognized or not, is mirrored into the debug recorder.
pub struct EventRouter {
    buffers: DeltaBuffers,
    usage: UsageTracker,
    ledger: ToolLedger,
    recorder: DebugRecorder,
    visible: VecDeque<VisibleRecord>,
    last_key: Option<DedupKey>,
    last_count: u32,
    event_tx: Option<broadcast::Sender<SessionEvent>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(UsageTracker::default())
    }
}

impl EventRouter {
    pub fn new(usage: UsageTracker) -> Self {
        Self {
            buffers: DeltaBuffers::new(),
            usage,
            ledger: ToolLedger::new(),
            recorder: DebugRecorder::new(),
            visible: VecDeque::new(),
            last_key: None,
            last_count: 0,
            event_tx: None,
        }
    }

    /// Forward deltas, tool executions and usage updates to subscribers
    pub fn with_events(mut self, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Route one envelope; returns the terminal it carried, if any
    pub fn route(&mut self, envelope: StreamEnvelope) -> Option<Terminal> {
        tracing::debug!("Envelope {}", envelope.event_type);
        self.track_visible(&envelope);
        self.recorder.record(&envelope);

        match envelope.decode() {
            WireEvent::AssistantDelta { delta } => {
                self.append(DeltaChannel::Assistant, delta);
                None
            }
            WireEvent::ReasoningDelta { delta } => {
                self.append(DeltaChannel::Reasoning, delta);
                None
            }
            WireEvent::ThinkingDelta { delta } => {
                self.append(DeltaChannel::Thinking, delta);
                None
            }
            WireEvent::ToolExecuted(record) => {
                self.ledger.push(record.clone());
                self.emit(SessionEvent::ToolExecuted(record));
                None
            }
            WireEvent::OpenAiEvent(_) => None,
            WireEvent::Usage(snapshot) => {
                let snapshot = self.usage.update(snapshot).clone();
                self.emit(SessionEvent::UsageUpdated(snapshot));
                None
            }
            WireEvent::Complete(payload) => Some(Terminal::Complete(payload)),
            WireEvent::FinalResponse(payload) => Some(Terminal::FinalResponse(payload)),
            WireEvent::SimulationComplete(payload) => Some(Terminal::Simulation(payload)),
            WireEvent::Error { message } => Some(Terminal::Error { message }),
            WireEvent::Unknown { event_type } => {
                tracing::debug!("Unhandled event type {}, recorded only", event_type);
                None
            }
            WireEvent::Malformed { .. } => None,
        }
    }

    /// Clear per-step state before a request goes out
    pub fn reset_step(&mut self, payload: Value, model: Option<String>) {
        self.buffers.reset();
        self.visible.clear();
        self.last_key = None;
        self.last_count = 0;
        self.recorder.reset_realtime(payload, model);
    }

    /// Start attributing tool executions to a new logical turn
    pub fn begin_turn(&mut self) {
        self.ledger.mark_turn();
    }

    pub fn read(&self, channel: DeltaChannel) -> &str {
        self.buffers.read(channel)
    }

    pub fn assistant_text(&self) -> &str {
        self.buffers.read(DeltaChannel::Assistant)
    }

    pub fn turn_tool_refs(&self) -> Vec<ToolCallRef> {
        self.ledger.turn_refs()
    }

    pub fn recent_tools(&self, n: usize) -> Vec<&ToolCallRecord> {
        self.ledger.recent(n)
    }

    pub fn usage(&self) -> Option<&UsageSnapshot> {
        self.usage.snapshot()
    }

    pub fn cost(&self) -> Option<CostBreakdown> {
        self.usage.cost()
    }

    pub fn set_rates(&mut self, rates: RateTable) {
        self.usage.set_rates(rates);
    }

    pub fn visible(&self) -> &VecDeque<VisibleRecord> {
        &self.visible
    }

    pub fn recorder(&self) -> &DebugRecorder {
        &self.recorder
    }

    pub fn set_tools_visible(&mut self, visible: bool) {
        self.recorder.set_tools_visible(visible);
    }

    pub fn tools_visible(&self) -> bool {
        self.recorder.tools_visible()
    }

    /// Drop everything tied to the conversation
    pub fn clear(&mut self) {
        self.buffers.reset();
        self.visible.clear();
        self.last_key = None;
        self.last_count = 0;
        self.ledger.clear();
        self.usage.clear();
    }

    /// Assemble the debug document for the current step
    pub fn debug_export(&self, session_id: &str, machine: &ContinuationMachine) -> DebugExport {
        DebugExport {
            session_id: session_id.to_string(),
            step: machine.step(),
            phase: machine.phase().name().to_string(),
            state: self.recorder.state().clone(),
            usage: self.usage.snapshot().cloned(),
            cost: self.usage.cost(),
            visible: self.visible.iter().cloned().collect(),
            last_assistant_text: self.buffers.read(DeltaChannel::Assistant).to_string(),
            reasoning: self.buffers.read(DeltaChannel::Reasoning).to_string(),
            thinking: self.buffers.read(DeltaChannel::Thinking).to_string(),
            tool_calls: self.ledger.recent(LEDGER_CAPACITY).into_iter().cloned().collect(),
            trace: machine.trace().clone(),
            failure: machine.failure().cloned(),
        }
    }

    fn append(&mut self, channel: DeltaChannel, delta: String) {
        self.buffers.append(channel, &delta);
        self.emit(SessionEvent::Delta { channel, delta });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn track_visible(&mut self, envelope: &StreamEnvelope) {
        let key = envelope.dedup_key();
        if self.last_key.as_ref() == Some(&key) {
            self.last_count += 1;
            if let Some(record) = self.visible.back_mut() {
                record.count = self.last_count;
            }
            return;
        }

        if self.visible.len() >= VISIBLE_LIMIT {
            self.visible.pop_front();
        }
        self.visible.push_back(VisibleRecord {
            label: key.label(),
            key: key.clone(),
            count: 1,
        });
        self.last_key = Some(key);
        self.last_count = 1;
    }
}

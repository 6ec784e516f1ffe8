//! Debug/audit recorder and the export document

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use playdeck_wire::{
    CostBreakdown, DedupKey, ExecutionTrace, StreamEnvelope, ToolCallRecord, UsageSnapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::failure::TurnFailure;

/// Envelopes kept per step
pub const RECORDER_CAPACITY: usize = 120;

/// One envelope as observed, verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Milliseconds since the Unix epoch
    pub at: i64,
    pub event_type: String,
    pub payload: Value,
}

/// A collapsed run of envelopes sharing one [`DedupKey`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleRecord {
    pub key: DedupKey,
    pub label: String,
    pub count: u32,
}

impl VisibleRecord {
    pub fn display(&self) -> String {
        if self.count > 1 {
            format!("{} ×{}", self.label, self.count)
        } else {
            self.label.clone()
        }
    }
}

/// Per-step debug state, replaced wholesale on every reset
#[derive(Debug, Clone, Serialize)]
pub struct DebugState {
    pub started_at: DateTime<Utc>,
    pub payload: Option<Value>,
    pub model: Option<String>,
    pub events: VecDeque<RecordedEvent>,
    pub tools_visible: bool,
}

impl DebugState {
    fn new(payload: Option<Value>, model: Option<String>, tools_visible: bool) -> Self {
        Self {
            started_at: Utc::now(),
            payload,
            model,
            events: VecDeque::new(),
            tools_visible,
        }
    }
}

/// Mirrors every envelope and the outbound request of the current step
#[derive(Debug, Clone)]
pub struct DebugRecorder {
    state: DebugState,
}

impl Default for DebugRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRecorder {
    pub fn new() -> Self {
        Self {
            state: DebugState::new(None, None, false),
        }
    }

    /// Start a fresh frame for a new step. Only the tools-visible toggle survives.
    pub fn reset_realtime(&mut self, payload: Value, model: Option<String>) {
        self.state = DebugState::new(Some(payload), model, self.state.tools_visible);
    }

    pub fn record(&mut self, envelope: &StreamEnvelope) {
        if self.state.events.len() >= RECORDER_CAPACITY {
            self.state.events.pop_front();
        }
        self.state.events.push_back(RecordedEvent {
            at: Utc::now().timestamp_millis(),
            event_type: envelope.event_type.clone(),
            payload: envelope.payload.clone(),
        });
    }

    pub fn state(&self) -> &DebugState {
        &self.state
    }

    pub fn events(&self) -> &VecDeque<RecordedEvent> {
        &self.state.events
    }

    pub fn set_tools_visible(&mut self, visible: bool) {
        self.state.tools_visible = visible;
    }

    pub fn tools_visible(&self) -> bool {
        self.state.tools_visible
    }

    /// Copy the export to the clipboard; returns the exact text written
    pub fn copy_to_clipboard(
        &self,
        export: &DebugExport,
        clipboard: &dyn Clipboard,
    ) -> Result<String> {
        let text = export.serialize()?;
        clipboard.set_text(&text)?;
        Ok(text)
    }

    /// Write the export to `path`; a directory gets a timestamped file name inside it
    pub fn download_as_file(&self, export: &DebugExport, path: &Path) -> Result<PathBuf> {
        let target = if path.is_dir() {
            path.join(export.default_file_name())
        } else {
            path.to_path_buf()
        };
        let text = export.serialize()?;
        std::fs::write(&target, text.as_bytes())
            .map_err(|e| Error::Export(format!("{}: {}", target.display(), e)))?;
        Ok(target)
    }
}

/// The document produced by "copy" and "download"
#[derive(Debug, Clone, Serialize)]
pub struct DebugExport {
    pub session_id: String,
    pub step: u32,
    pub phase: String,
    #[serde(flatten)]
    pub state: DebugState,
    pub usage: Option<UsageSnapshot>,
    pub cost: Option<CostBreakdown>,
    pub visible: Vec<VisibleRecord>,
    pub last_assistant_text: String,
    pub reasoning: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub trace: ExecutionTrace,
    pub failure: Option<TurnFailure>,
}

impl DebugExport {
    /// The one serialization shared by copy and download
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Export(e.to_string()))
    }

    pub fn default_file_name(&self) -> String {
        format!(
            "playdeck-debug-{}-{}.json",
            self.session_id,
            self.state.started_at.format("%Y%m%dT%H%M%S")
        )
    }
}

/// Destination for "copy"
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

/// Clipboard that keeps the last copied text in memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}

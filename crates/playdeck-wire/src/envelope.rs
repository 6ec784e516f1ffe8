//! Stream envelopes and their typed payloads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::de::null_as_default;
use crate::types::{Continuation, ExecutionTrace, ToolCallRecord};
use crate::usage::{UsagePayload, UsageSnapshot};

pub const ASSISTANT_DELTA: &str = "assistant.delta";
pub const ITERATION_ASSISTANT_DELTA: &str = "iteration.assistant_delta";
pub const REASONING_DELTA: &str = "reasoning.delta";
pub const THINKING_DELTA: &str = "thinking.delta";
pub const TOOL_EXECUTED: &str = "tool.executed";
pub const OPENAI_EVENT: &str = "openai.event";
pub const USAGE: &str = "usage";
pub const COMPLETE: &str = "complete";
pub const ITERATION_FINAL_RESPONSE: &str = "iteration.final_response";
pub const SIMULATION_COMPLETE: &str = "simulation.complete";
pub const ERROR: &str = "error";

/// Event type of frames that carried no `event:` line
pub const DEFAULT_EVENT_TYPE: &str = "message";

const KNOWN_EVENT_TYPES: &[&str] = &[
    ASSISTANT_DELTA,
    ITERATION_ASSISTANT_DELTA,
    REASONING_DELTA,
    THINKING_DELTA,
    TOOL_EXECUTED,
    OPENAI_EVENT,
    USAGE,
    COMPLETE,
    ITERATION_FINAL_RESPONSE,
    SIMULATION_COMPLETE,
    ERROR,
];

/// One decoded `(event type, payload)` unit from the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub event_type: String,
    pub payload: Value,
}

impl StreamEnvelope {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// The event type used for dispatch.
    ///
    /// Frames without an `event:` line fall back to a known `payload.type`.
    pub fn effective_type(&self) -> &str {
        if self.event_type == DEFAULT_EVENT_TYPE {
            if let Some(kind) = self.payload.get("type").and_then(Value::as_str) {
                if KNOWN_EVENT_TYPES.contains(&kind) {
                    return kind;
                }
            }
        }
        &self.event_type
    }

    /// Presentation key used to collapse consecutive repeats
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            event_type: self.event_type.clone(),
            kind: field_string(&self.payload, "type"),
            id: field_string(&self.payload, "id"),
            name: field_string(&self.payload, "name"),
        }
    }

    /// Decode the payload into its typed form
    pub fn decode(&self) -> WireEvent {
        WireEvent::parse(self.effective_type(), &self.payload)
    }

    /// Convert a buffered endpoint response into the envelopes the
    /// streaming endpoint would have sent for it.
    pub fn from_buffered(body: Value) -> Vec<StreamEnvelope> {
        let mut envelopes = Vec::new();

        if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
            envelopes.push(StreamEnvelope::new(
                USAGE,
                json!({
                    "usage": usage,
                    "model": body.get("model").cloned().unwrap_or(Value::Null),
                    "cumulative": true,
                }),
            ));
        }

        let has = |key: &str| body.get(key).is_some_and(|v| !v.is_null());
        let terminal = if has("error") && !has("assistant") && !has("final_response") {
            ERROR
        } else if has("final_response") || has("steps") || has("execution_flow") {
            SIMULATION_COMPLETE
        } else {
            COMPLETE
        };
        envelopes.push(StreamEnvelope::new(terminal, body));
        envelopes
    }
}

/// Presentation-only key derived from `(event type, payload.type, payload.id, payload.name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub event_type: String,
    pub kind: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
}

impl DedupKey {
    /// Human-readable label for a visible record
    pub fn label(&self) -> String {
        let mut label = self.event_type.clone();
        for part in [&self.kind, &self.name, &self.id].into_iter().flatten() {
            label.push_str(" · ");
            label.push_str(part);
        }
        label
    }
}

fn field_string(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Payload of `openai.event`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiEventPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub event: String,
    pub preview: Option<String>,
    pub raw: Option<Value>,
}

/// Payload of `complete`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompletePayload {
    pub assistant: Option<String>,
    pub continuation: Option<Continuation>,
    #[serde(flatten)]
    pub trace: ExecutionTrace,
}

/// Payload of `iteration.final_response`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FinalResponsePayload {
    pub content: Option<String>,
    pub iterations: Option<u32>,
}

/// Payload of `simulation.complete`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub chat_history: Vec<Value>,
    pub continuation: Option<Continuation>,
    pub user_input_data: Option<Value>,
    #[serde(flatten)]
    pub trace: ExecutionTrace,
}

impl SimulationPayload {
    /// The continuation to resume with.
    ///
    /// Simulations that pause without an explicit token get one synthesized
    /// from `requires_user_input` and `user_input_data`.
    pub fn effective_continuation(&self) -> Option<Continuation> {
        if let Some(cont) = &self.continuation {
            return Some(cont.clone());
        }
        if !self.trace.requires_user_input {
            return None;
        }
        let data = self.user_input_data.clone().or_else(|| {
            self.trace
                .user_input_prompt
                .as_ref()
                .map(|prompt| json!({ "prompt": prompt }))
        });
        Some(Continuation {
            pending: true,
            requires_user_input: true,
            user_input_data: data,
            ..Default::default()
        })
    }
}

/// Typed form of every recognized envelope
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    AssistantDelta { delta: String },
    ReasoningDelta { delta: String },
    ThinkingDelta { delta: String },
    ToolExecuted(ToolCallRecord),
    OpenAiEvent(OpenAiEventPayload),
    Usage(UsageSnapshot),
    Complete(Box<CompletePayload>),
    FinalResponse(FinalResponsePayload),
    SimulationComplete(Box<SimulationPayload>),
    Error { message: String },
    /// Event type this client does not know
    Unknown { event_type: String },
    /// Known event type whose payload did not have the expected shape
    Malformed { event_type: String, reason: String },
}

#[derive(Deserialize)]
struct DeltaPayload {
    delta: String,
}

impl WireEvent {
    /// Decode a payload for the given event type
    pub fn parse(event_type: &str, payload: &Value) -> Self {
        match event_type {
            ASSISTANT_DELTA | ITERATION_ASSISTANT_DELTA => {
                typed(event_type, payload, |p: DeltaPayload| WireEvent::AssistantDelta {
                    delta: p.delta,
                })
            }
            REASONING_DELTA => typed(event_type, payload, |p: DeltaPayload| {
                WireEvent::ReasoningDelta { delta: p.delta }
            }),
            THINKING_DELTA => typed(event_type, payload, |p: DeltaPayload| {
                WireEvent::ThinkingDelta { delta: p.delta }
            }),
            TOOL_EXECUTED => typed(event_type, payload, WireEvent::ToolExecuted),
            OPENAI_EVENT => typed(event_type, payload, WireEvent::OpenAiEvent),
            USAGE => typed(event_type, payload, |p: UsagePayload| {
                WireEvent::Usage(UsageSnapshot::from(p))
            }),
            COMPLETE => typed(event_type, payload, |p| WireEvent::Complete(Box::new(p))),
            ITERATION_FINAL_RESPONSE => typed(event_type, payload, WireEvent::FinalResponse),
            SIMULATION_COMPLETE => typed(event_type, payload, |p| {
                WireEvent::SimulationComplete(Box::new(p))
            }),
            ERROR => WireEvent::Error {
                message: error_message(payload),
            },
            other => WireEvent::Unknown {
                event_type: other.to_string(),
            },
        }
    }

    /// Check if this event ends a step
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WireEvent::Complete(_)
                | WireEvent::FinalResponse(_)
                | WireEvent::SimulationComplete(_)
                | WireEvent::Error { .. }
        )
    }
}

fn typed<T, F>(event_type: &str, payload: &Value, wrap: F) -> WireEvent
where
    T: DeserializeOwned,
    F: FnOnce(T) -> WireEvent,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(p) => wrap(p),
        Err(e) => {
            tracing::warn!("Malformed {} payload: {}", event_type, e);
            WireEvent::Malformed {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Extract a human-readable message from an `error` payload
fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("error").or_else(|| obj.get("message")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(inner)) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
            Some(other) => other.to_string(),
            None => payload.to_string(),
        },
        other => other.to_string(),
    }
}

//! Core types shared by the request body and the event payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::de::{lenient_opt_u64, null_as_default};

/// Conversation roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Reference to a tool executed while producing an assistant turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub tool: String,
    pub success: bool,
}

/// One entry of the conversation history sent as `chat_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    /// Set while the assistant turn is a live preview that may still be replaced
    #[serde(skip)]
    pub streaming: bool,
    /// Failure message for an assistant turn that ended in error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationTurn {
    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            tool_calls: vec![],
            streaming: false,
            error: None,
        }
    }

    /// Create a finalized assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            tool_calls: vec![],
            streaming: false,
            error: None,
        }
    }

    /// Create an empty assistant turn that is still streaming
    pub fn assistant_streaming() -> Self {
        Self {
            streaming: true,
            ..Self::assistant("")
        }
    }

    /// Attach tool references
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRef>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// One executed tool, as reported by `tool.executed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(
        default,
        alias = "ms",
        deserialize_with = "lenient_opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
}

impl ToolCallRecord {
    pub fn to_ref(&self) -> ToolCallRef {
        ToolCallRef {
            tool: self.tool.clone(),
            success: self.success,
        }
    }
}

/// Server-supplied token describing a pending tool call or a required
/// user disambiguation.
///
/// Unknown fields are kept in `extra` so the token can be echoed back
/// verbatim as `previous_result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Continuation {
    #[serde(deserialize_with = "null_as_default")]
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tool_args: Option<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub requires_user_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Continuation {
    /// The turn is paused until the user answers
    pub fn needs_user_input(&self) -> bool {
        self.pending && self.requires_user_input
    }

    /// A further step can be requested without asking the user anything
    pub fn should_auto_continue(&self) -> bool {
        self.pending && !self.requires_user_input
    }

    /// Build the prompt shown to the user while paused
    pub fn prompt(&self, fallback_message: Option<&str>) -> UserInputPrompt {
        UserInputPrompt::from_data(self.user_input_data.as_ref(), fallback_message)
    }
}

/// A selectable candidate offered while a turn waits for user input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOption {
    pub label: String,
    pub value: String,
}

/// What the user is asked while a turn is paused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInputPrompt {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<InputOption>,
}

impl UserInputPrompt {
    /// Extract a prompt from the server's `user_input_data` object.
    ///
    /// The message is read from `prompt`, `message` or `question`; candidates
    /// from `options`, `candidates` or `choices` (strings or objects).
    pub fn from_data(data: Option<&Value>, fallback_message: Option<&str>) -> Self {
        let message = data
            .and_then(|d| {
                ["prompt", "message", "question"]
                    .iter()
                    .find_map(|k| d.get(*k).and_then(Value::as_str))
            })
            .or(fallback_message)
            .unwrap_or("Additional input is required to continue.")
            .to_string();

        let options = data
            .and_then(|d| {
                ["options", "candidates", "choices"]
                    .iter()
                    .find_map(|k| d.get(*k).and_then(Value::as_array))
            })
            .map(|items| items.iter().filter_map(parse_option).collect())
            .unwrap_or_default();

        Self { message, options }
    }

    /// Resolve a 1-based pick to the candidate's value
    pub fn pick(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.options.get(i))
            .map(|o| o.value.as_str())
    }
}

fn parse_option(item: &Value) -> Option<InputOption> {
    match item {
        Value::String(s) => Some(InputOption {
            label: s.clone(),
            value: s.clone(),
        }),
        Value::Object(obj) => {
            let pick = |keys: &[&str]| {
                keys.iter().find_map(|k| match obj.get(*k) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                })
            };
            let label = pick(&["label", "name", "title", "value", "id"])?;
            let value = pick(&["value", "id", "name", "label"]).unwrap_or_else(|| label.clone());
            Some(InputOption { label, value })
        }
        Value::Number(n) => Some(InputOption {
            label: n.to_string(),
            value: n.to_string(),
        }),
        _ => None,
    }
}

/// Aggregated execution trace of one logical turn.
///
/// A turn paused for user input spans several steps; list fields are
/// concatenated across steps, scalar fields reflect the latest step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionTrace {
    #[serde(deserialize_with = "null_as_default")]
    pub steps: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub execution_flow: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub tools_used: Vec<Value>,
    pub final_response: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub requires_user_input: bool,
    pub user_input_prompt: Option<String>,
    /// Step that ended in failure, if any
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<u32>,
}

impl ExecutionTrace {
    /// Fold the next step's result into this trace
    pub fn merge_step(&mut self, next: ExecutionTrace) {
        self.steps.extend(next.steps);
        self.execution_flow.extend(next.execution_flow);
        self.tools_used.extend(next.tools_used);
        self.final_response = next.final_response;
        self.requires_user_input = next.requires_user_input;
        self.user_input_prompt = next.user_input_prompt;
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
            && self.execution_flow.is_empty()
            && self.tools_used.is_empty()
            && self.final_response.is_none()
    }
}

/// Request body shared by the buffered and streaming endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    pub chat_history: Vec<ConversationTurn>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_result: Option<Continuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub continuation: Option<Continuation>,
    #[serde(default)]
    pub context: Option<Value>,
}

impl TurnRequest {
    /// Create a request for a fresh turn
    pub fn new(
        message: impl Into<String>,
        chat_history: Vec<ConversationTurn>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            chat_history,
            session_id: session_id.into(),
            step: None,
            previous_result: None,
            user_input: None,
            model: None,
            continuation: None,
            context: None,
        }
    }

    /// Mark this request as the resumption of a paused or pending turn
    pub fn resuming(
        mut self,
        step: u32,
        continuation: Continuation,
        user_input: Option<String>,
    ) -> Self {
        self.step = Some(step);
        self.previous_result = Some(continuation.clone());
        self.continuation = Some(continuation);
        self.user_input = user_input;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_streaming_flag_not_serialized() {
        let turn = ConversationTurn::assistant_streaming();
        let value = serde_json::to_value(&turn).unwrap();
        assert!(value.get("streaming").is_none());
        assert_eq!(value["role"], "assistant");
    }

    #[test]
    fn test_request_omits_optional_resume_fields() {
        let req = TurnRequest::new("hi", vec![], "s1");
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("step").is_none());
        assert!(value.get("previous_result").is_none());
        assert!(value.get("user_input").is_none());
        assert_eq!(value["model"], Value::Null);
        assert_eq!(value["continuation"], Value::Null);
        assert_eq!(value["context"], Value::Null);
    }

    #[test]
    fn test_resuming_sets_step_and_previous_result() {
        let cont = Continuation {
            pending: true,
            requires_user_input: true,
            ..Default::default()
        };
        let req = TurnRequest::new("find acme", vec![], "s1").resuming(
            2,
            cont.clone(),
            Some("Acme Ltd".into()),
        );
        assert_eq!(req.step, Some(2));
        assert_eq!(req.previous_result, Some(cont));
        assert_eq!(req.user_input.as_deref(), Some("Acme Ltd"));
    }

    #[test]
    fn test_continuation_keeps_unknown_fields() {
        let raw = json!({
            "pending": true,
            "next_tool": "search_contacts",
            "next_tool_args": {"q": "acme"},
            "requires_user_input": false,
            "plan_id": "p-42"
        });
        let cont: Continuation = serde_json::from_value(raw.clone()).unwrap();
        assert!(cont.should_auto_continue());
        assert_eq!(cont.extra.get("plan_id"), Some(&json!("p-42")));
        assert_eq!(serde_json::to_value(&cont).unwrap(), raw);
    }

    #[test]
    fn test_prompt_from_string_and_object_options() {
        let data = json!({
            "question": "Which company?",
            "candidates": ["Acme Ltd", {"name": "Acme Inc", "id": 7}]
        });
        let prompt = UserInputPrompt::from_data(Some(&data), None);
        assert_eq!(prompt.message, "Which company?");
        assert_eq!(prompt.options.len(), 2);
        assert_eq!(prompt.options[1].label, "Acme Inc");
        assert_eq!(prompt.options[1].value, "7");
        assert_eq!(prompt.pick(1), Some("Acme Ltd"));
        assert_eq!(prompt.pick(0), None);
        assert_eq!(prompt.pick(3), None);
    }

    #[test]
    fn test_prompt_falls_back_to_message() {
        let prompt = UserInputPrompt::from_data(None, Some("Pick one"));
        assert_eq!(prompt.message, "Pick one");
        assert!(prompt.options.is_empty());
    }

    #[test]
    fn test_merge_step_concatenates_lists_and_replaces_scalars() {
        let mut trace = ExecutionTrace {
            steps: vec![json!({"n": 1})],
            execution_flow: vec![json!("intent"), json!("discovery")],
            tools_used: vec![json!("search")],
            final_response: Some("Which one?".into()),
            requires_user_input: true,
            user_input_prompt: Some("Which one?".into()),
            failed_step: None,
        };
        trace.merge_step(ExecutionTrace {
            steps: vec![json!({"n": 2})],
            execution_flow: vec![json!("execute")],
            tools_used: vec![json!("update")],
            final_response: Some("Done".into()),
            requires_user_input: false,
            user_input_prompt: None,
            failed_step: None,
        });
        assert_eq!(
            trace.execution_flow,
            vec![json!("intent"), json!("discovery"), json!("execute")]
        );
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.tools_used, vec![json!("search"), json!("update")]);
        assert_eq!(trace.final_response.as_deref(), Some("Done"));
        assert!(!trace.requires_user_input);
        assert!(trace.user_input_prompt.is_none());
    }

    #[test]
    fn test_tool_record_reads_ms_alias() {
        let rec: ToolCallRecord =
            serde_json::from_value(json!({"tool": "lookup", "success": true, "ms": 42})).unwrap();
        assert_eq!(rec.duration_ms, Some(42));
    }

    #[test]
    fn test_tool_record_fractional_duration() {
        let rec: ToolCallRecord =
            serde_json::from_value(json!({"tool": "search", "success": true, "ms": 12.5}))
                .unwrap();
        assert_eq!(rec.duration_ms, Some(13));

        let rec: ToolCallRecord =
            serde_json::from_value(json!({"tool": "search", "success": null, "ms": null}))
                .unwrap();
        assert!(!rec.success);
        assert_eq!(rec.duration_ms, None);
    }

    #[test]
    fn test_trace_tolerates_null_fields() {
        let trace: ExecutionTrace = serde_json::from_value(json!({
            "steps": null,
            "execution_flow": null,
            "tools_used": null,
            "requires_user_input": null,
            "final_response": "Hello"
        }))
        .unwrap();
        assert!(trace.steps.is_empty());
        assert!(!trace.requires_user_input);
        assert_eq!(trace.final_response.as_deref(), Some("Hello"));

        let cont: Continuation =
            serde_json::from_value(json!({"pending": null, "requires_user_input": null})).unwrap();
        assert!(!cont.pending);
    }
}

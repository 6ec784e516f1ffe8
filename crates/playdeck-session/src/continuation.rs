//! Turn state: conversation history, the in-flight guard and multi-step continuation

use playdeck_wire::envelope::{CompletePayload, FinalResponsePayload, SimulationPayload};
use playdeck_wire::{
    Continuation, ConversationTurn, ExecutionTrace, ToolCallRef, TurnRequest, UserInputPrompt,
};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::failure::{FailureKind, TurnFailure};

/// Default bound on automatic continuation steps within one turn
pub const DEFAULT_MAX_AUTO_STEPS: u32 = 8;

/// A terminal envelope handed from the router to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Complete(Box<CompletePayload>),
    FinalResponse(FinalResponsePayload),
    Simulation(Box<SimulationPayload>),
    Error { message: String },
}

/// Where the current logical turn stands
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Streaming {
        step: u32,
    },
    Completed,
    AwaitingUserInput {
        step: u32,
        prompt: UserInputPrompt,
    },
    Failed(TurnFailure),
}

impl TurnPhase {
    /// The single in-flight guard
    pub fn is_streaming(&self) -> bool {
        matches!(self, TurnPhase::Streaming { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TurnPhase::AwaitingUserInput { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Streaming { .. } => "streaming",
            TurnPhase::Completed => "completed",
            TurnPhase::AwaitingUserInput { .. } => "awaiting_user_input",
            TurnPhase::Failed(_) => "failed",
        }
    }
}

/// What a terminal envelope did to the turn
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed { content: String },
    AwaitingUserInput(UserInputPrompt),
    /// The server has more work queued; request `step` without asking the user
    ContinuePending { step: u32 },
    Failed(TurnFailure),
}

/// Owns the conversation history and the lifecycle of the current turn.
///
/// History is append-only except for the tail assistant turn, which is a
/// streaming placeholder until the turn finalizes and is then replaced by
/// pop-then-push.
#[derive(Debug, Clone)]
pub struct ContinuationMachine {
    history: Vec<ConversationTurn>,
    phase: TurnPhase,
    step: u32,
    message: String,
    user_input: Option<String>,
    continuation: Option<Continuation>,
    trace: ExecutionTrace,
    /// Index of the current turn's user message; `chat_history` is everything before it
    turn_start: usize,
    terminal_seen: bool,
    auto_steps: u32,
    max_auto_steps: u32,
}

impl Default for ContinuationMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AUTO_STEPS)
    }
}

impl ContinuationMachine {
    pub fn new(max_auto_steps: u32) -> Self {
        Self {
            history: Vec::new(),
            phase: TurnPhase::Idle,
            step: 0,
            message: String::new(),
            user_input: None,
            continuation: None,
            trace: ExecutionTrace::default(),
            turn_start: 0,
            terminal_seen: false,
            auto_steps: 0,
            max_auto_steps,
        }
    }

    /// Seed history from a saved transcript
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.turn_start = history.len();
        self.history = history;
        self
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.phase
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    pub fn failure(&self) -> Option<&TurnFailure> {
        match &self.phase {
            TurnPhase::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Start a new logical turn
    pub fn begin_turn(&mut self, message: &str) -> Result<u32> {
        match self.phase {
            TurnPhase::Streaming { .. } => return Err(Error::Busy),
            TurnPhase::AwaitingUserInput { .. } => return Err(Error::AwaitingUserInput),
            _ => {}
        }

        self.turn_start = self.history.len();
        self.history.push(ConversationTurn::user(message));
        self.history.push(ConversationTurn::assistant_streaming());

        self.message = message.to_string();
        self.user_input = None;
        self.continuation = None;
        self.trace = ExecutionTrace::default();
        self.auto_steps = 0;
        self.step = 1;
        self.enter_streaming();
        Ok(self.step)
    }

    /// Resume a paused turn with the user's answer
    pub fn resume(&mut self, user_input: &str) -> Result<u32> {
        let step = match self.phase {
            TurnPhase::AwaitingUserInput { step, .. } => step,
            TurnPhase::Streaming { .. } => return Err(Error::Busy),
            _ => return Err(Error::NothingToResume),
        };

        self.history.push(ConversationTurn::user(user_input));
        self.history.push(ConversationTurn::assistant_streaming());

        self.user_input = Some(user_input.to_string());
        self.auto_steps = 0;
        self.step = step + 1;
        self.enter_streaming();
        Ok(self.step)
    }

    /// Move to the next step after [`TerminalOutcome::ContinuePending`]
    pub fn advance_step(&mut self) -> u32 {
        self.user_input = None;
        self.auto_steps += 1;
        self.step += 1;
        if let Some(tail) = self.tail_placeholder() {
            tail.content.clear();
        }
        self.enter_streaming();
        self.step
    }

    /// Body for the request of the current step
    pub fn request(&self, session_id: &str) -> TurnRequest {
        let chat_history = self.history[..self.turn_start].to_vec();
        let request = TurnRequest::new(self.message.clone(), chat_history, session_id);
        match (&self.continuation, self.step > 1) {
            (Some(cont), true) => request.resuming(self.step, cont.clone(), self.user_input.clone()),
            _ => request,
        }
    }

    /// Apply a terminal envelope.
    ///
    /// Returns `None` when the step already had its terminal, or no step is
    /// streaming; the first terminal of a step wins.
    pub fn apply_terminal(
        &mut self,
        terminal: Terminal,
        assistant_buffer: &str,
        tool_calls: Vec<ToolCallRef>,
    ) -> Option<TerminalOutcome> {
        if !self.phase.is_streaming() || self.terminal_seen {
            tracing::warn!("Ignoring extra terminal event in step {}", self.step);
            return None;
        }
        self.terminal_seen = true;

        let (content, continuation) = match terminal {
            Terminal::Error { message } => {
                let failure = TurnFailure::new(FailureKind::Server, message, self.step);
                return Some(TerminalOutcome::Failed(self.fail(failure, assistant_buffer)));
            }
            Terminal::Complete(payload) => {
                let CompletePayload {
                    assistant,
                    continuation,
                    trace,
                } = *payload;
                self.trace.merge_step(trace);
                (authoritative(assistant, assistant_buffer), continuation)
            }
            Terminal::FinalResponse(payload) => {
                (authoritative(payload.content, assistant_buffer), None)
            }
            Terminal::Simulation(payload) => {
                let continuation = payload.effective_continuation();
                let content = authoritative(payload.trace.final_response.clone(), assistant_buffer);
                self.trace.merge_step(payload.trace);
                (content, continuation)
            }
        };

        let outcome = match continuation {
            Some(cont) if cont.needs_user_input() => {
                let fallback = (!content.is_empty()).then_some(content.as_str());
                let prompt = cont.prompt(fallback);
                let shown = if content.is_empty() {
                    prompt.message.clone()
                } else {
                    content
                };
                self.replace_tail(ConversationTurn::assistant(shown).with_tool_calls(tool_calls));
                self.continuation = Some(cont);
                self.phase = TurnPhase::AwaitingUserInput {
                    step: self.step,
                    prompt: prompt.clone(),
                };
                TerminalOutcome::AwaitingUserInput(prompt)
            }
            Some(cont) if cont.should_auto_continue() => {
                if self.auto_steps >= self.max_auto_steps {
                    let failure = TurnFailure::new(
                        FailureKind::StepLimit,
                        format!(
                            "Stopped after {} automatic steps; the server still reports pending work",
                            self.max_auto_steps
                        ),
                        self.step,
                    );
                    return Some(TerminalOutcome::Failed(self.fail(failure, &content)));
                }
                if let Some(tail) = self.tail_placeholder() {
                    tail.content = content;
                }
                self.continuation = Some(cont);
                TerminalOutcome::ContinuePending {
                    step: self.step + 1,
                }
            }
            _ => {
                self.replace_tail(ConversationTurn::assistant(&content).with_tool_calls(tool_calls));
                self.finish_turn();
                TerminalOutcome::Completed { content }
            }
        };

        Some(outcome)
    }

    /// The stream ended; settle a step that never saw a terminal envelope
    pub fn finish_stream(
        &mut self,
        assistant_buffer: &str,
        tool_calls: Vec<ToolCallRef>,
    ) -> Option<TerminalOutcome> {
        if !self.phase.is_streaming() || self.terminal_seen {
            return None;
        }
        if assistant_buffer.is_empty() {
            let failure = TurnFailure::new(
                FailureKind::Incomplete,
                "Stream ended without a terminal event",
                self.step,
            );
            return Some(TerminalOutcome::Failed(self.fail(failure, "")));
        }
        tracing::warn!(
            "Stream ended without a terminal event in step {}, keeping streamed text",
            self.step
        );
        self.terminal_seen = true;
        let content = assistant_buffer.to_string();
        self.replace_tail(ConversationTurn::assistant(&content).with_tool_calls(tool_calls));
        self.finish_turn();
        Some(TerminalOutcome::Completed { content })
    }

    /// Fail the current step.
    ///
    /// Prior steps stay in the trace; the placeholder becomes an assistant
    /// turn holding the partial text and the error.
    pub fn fail(&mut self, failure: TurnFailure, partial: &str) -> TurnFailure {
        self.trace.failed_step = Some(failure.step);
        let mut turn = ConversationTurn::assistant(partial);
        turn.error = Some(failure.message.clone());
        self.replace_tail(turn);
        self.continuation = None;
        self.phase = TurnPhase::Failed(failure.clone());
        failure
    }

    /// Drop the current turn.
    ///
    /// A paused turn is discarded so an unrelated turn can start; a
    /// streaming turn fails as cancelled. Returns whether anything changed.
    pub fn abandon(&mut self, partial: &str) -> bool {
        match self.phase {
            TurnPhase::AwaitingUserInput { .. } => {
                self.continuation = None;
                self.phase = TurnPhase::Idle;
                true
            }
            TurnPhase::Streaming { step } => {
                let failure = TurnFailure::new(FailureKind::Cancelled, "Cancelled", step);
                self.fail(failure, partial);
                true
            }
            _ => false,
        }
    }

    /// Forget everything, as after a server-side clear
    pub fn clear(&mut self) -> Result<()> {
        if self.phase.is_streaming() {
            return Err(Error::Busy);
        }
        *self = Self::new(self.max_auto_steps);
        Ok(())
    }

    fn enter_streaming(&mut self) {
        self.terminal_seen = false;
        self.phase = TurnPhase::Streaming { step: self.step };
    }

    fn finish_turn(&mut self) {
        self.continuation = None;
        self.phase = TurnPhase::Completed;
    }

    fn tail_placeholder(&mut self) -> Option<&mut ConversationTurn> {
        self.history.last_mut().filter(|t| t.streaming)
    }

    fn replace_tail(&mut self, turn: ConversationTurn) {
        if self.tail_placeholder().is_some() {
            self.history.pop();
        }
        self.history.push(turn);
    }
}

fn authoritative(field: Option<String>, buffer: &str) -> String {
    field
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| buffer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use playdeck_wire::Role;
    use serde_json::json;

    fn complete(value: serde_json::Value) -> Terminal {
        Terminal::Complete(Box::new(serde_json::from_value(value).unwrap()))
    }

    fn simulation(value: serde_json::Value) -> Terminal {
        Terminal::Simulation(Box::new(serde_json::from_value(value).unwrap()))
    }

    #[test]
    fn test_authoritative_content_wins() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        let outcome = m
            .apply_terminal(complete(json!({"assistant": "Hello"})), "Hel", vec![])
            .unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Completed {
                content: "Hello".into()
            }
        );
        assert_eq!(m.history().last().unwrap().content, "Hello");
        assert!(!m.history().last().unwrap().streaming);
        assert_eq!(m.phase(), &TurnPhase::Completed);
    }

    #[test]
    fn test_buffer_used_without_authoritative_field() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        let outcome = m
            .apply_terminal(complete(json!({})), "streamed", vec![])
            .unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Completed {
                content: "streamed".into()
            }
        );
    }

    #[test]
    fn test_guard_blocks_second_turn() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("one").unwrap();
        assert!(matches!(m.begin_turn("two"), Err(Error::Busy)));
        assert!(matches!(m.resume("x"), Err(Error::Busy)));
    }

    #[test]
    fn test_first_terminal_wins() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        assert!(
            m.apply_terminal(complete(json!({"assistant": "first"})), "", vec![])
                .is_some()
        );
        assert!(
            m.apply_terminal(
                Terminal::Error {
                    message: "late".into()
                },
                "",
                vec![]
            )
            .is_none()
        );
        assert_eq!(m.history().last().unwrap().content, "first");
        assert_eq!(m.phase(), &TurnPhase::Completed);
    }

    #[test]
    fn test_chat_history_excludes_current_turn() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("first").unwrap();
        m.apply_terminal(complete(json!({"assistant": "one"})), "", vec![]);
        m.begin_turn("second").unwrap();

        let req = m.request("s1");
        assert_eq!(req.message, "second");
        assert_eq!(req.chat_history.len(), 2);
        assert_eq!(req.chat_history[0].role, Role::User);
        assert_eq!(req.chat_history[1].content, "one");
        assert!(req.step.is_none());
    }

    #[test]
    fn test_pause_and_resume_concatenates_trace() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("update acme").unwrap();
        let outcome = m
            .apply_terminal(
                simulation(json!({
                    "final_response": "Which Acme?",
                    "execution_flow": ["intent", "discovery"],
                    "steps": [{"n": 1}],
                    "requires_user_input": true,
                    "user_input_data": {"prompt": "Which Acme?", "options": ["Acme Ltd", "Acme Inc"]}
                })),
                "",
                vec![],
            )
            .unwrap();
        let TerminalOutcome::AwaitingUserInput(prompt) = outcome else {
            panic!("expected pause");
        };
        assert_eq!(prompt.options.len(), 2);
        assert!(m.phase().is_paused());
        assert!(!m.phase().is_streaming());

        // An unrelated turn is blocked while paused
        assert!(matches!(m.begin_turn("other"), Err(Error::AwaitingUserInput)));

        let step = m.resume("Acme Ltd").unwrap();
        assert_eq!(step, 2);
        let req = m.request("s1");
        assert_eq!(req.step, Some(2));
        assert_eq!(req.message, "update acme");
        assert_eq!(req.user_input.as_deref(), Some("Acme Ltd"));
        assert!(req.previous_result.unwrap().requires_user_input);
        assert!(req.chat_history.is_empty());

        m.apply_terminal(
            simulation(json!({
                "final_response": "Updated",
                "execution_flow": ["execute"],
                "steps": [{"n": 2}]
            })),
            "",
            vec![],
        );
        assert_eq!(
            m.trace().execution_flow,
            vec![json!("intent"), json!("discovery"), json!("execute")]
        );
        assert_eq!(m.trace().final_response.as_deref(), Some("Updated"));
        assert!(!m.trace().requires_user_input);
        assert_eq!(m.phase(), &TurnPhase::Completed);

        let contents: Vec<&str> = m.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["update acme", "Which Acme?", "Acme Ltd", "Updated"]
        );
    }

    #[test]
    fn test_pending_without_input_continues_until_limit() {
        let mut m = ContinuationMachine::new(2);
        m.begin_turn("chain").unwrap();
        let pending = json!({"assistant": "working", "continuation": {"pending": true, "next_tool": "lookup"}});

        for expected in [2, 3] {
            let outcome = m.apply_terminal(complete(pending.clone()), "", vec![]);
            assert_eq!(outcome, Some(TerminalOutcome::ContinuePending { step: expected }));
            assert_eq!(m.advance_step(), expected);
            let req = m.request("s1");
            assert_eq!(req.step, Some(expected));
            assert_eq!(
                req.previous_result.and_then(|c| c.next_tool).as_deref(),
                Some("lookup")
            );
        }

        let outcome = m.apply_terminal(complete(pending), "", vec![]).unwrap();
        let TerminalOutcome::Failed(failure) = outcome else {
            panic!("expected step limit");
        };
        assert_eq!(failure.kind, FailureKind::StepLimit);
        assert!(!m.phase().is_streaming());
    }

    #[test]
    fn test_server_error_marks_failed_and_keeps_partial() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        let outcome = m
            .apply_terminal(
                Terminal::Error {
                    message: "tool crashed".into(),
                },
                "partial",
                vec![],
            )
            .unwrap();
        assert!(matches!(outcome, TerminalOutcome::Failed(ref f) if f.kind == FailureKind::Server));
        let tail = m.history().last().unwrap();
        assert_eq!(tail.content, "partial");
        assert_eq!(tail.error.as_deref(), Some("tool crashed"));
        assert_eq!(m.trace().failed_step, Some(1));

        // Guard released
        assert!(m.begin_turn("again").is_ok());
    }

    #[test]
    fn test_failure_keeps_prior_steps() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("go").unwrap();
        m.apply_terminal(
            simulation(json!({"execution_flow": ["a"], "requires_user_input": true})),
            "",
            vec![],
        );
        m.resume("yes").unwrap();
        m.fail(TurnFailure::new(FailureKind::Transport, "reset", 2), "");
        assert_eq!(m.trace().execution_flow, vec![json!("a")]);
        assert_eq!(m.trace().failed_step, Some(2));
        // The paused prompt turn is still in history
        assert_eq!(m.history().len(), 4);
    }

    #[test]
    fn test_stream_end_without_terminal() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        let outcome = m.finish_stream("only deltas", vec![]).unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Completed {
                content: "only deltas".into()
            }
        );

        m.begin_turn("again").unwrap();
        let outcome = m.finish_stream("", vec![]).unwrap();
        assert!(matches!(outcome, TerminalOutcome::Failed(ref f) if f.kind == FailureKind::Incomplete));
    }

    #[test]
    fn test_abandon() {
        let mut m = ContinuationMachine::default();
        assert!(!m.abandon(""));

        m.begin_turn("go").unwrap();
        m.apply_terminal(
            complete(json!({"continuation": {"pending": true, "requires_user_input": true}})),
            "Pick one",
            vec![],
        );
        assert!(m.abandon(""));
        assert_eq!(m.phase(), &TurnPhase::Idle);
        assert!(m.continuation().is_none());
        assert!(matches!(m.resume("x"), Err(Error::NothingToResume)));

        m.begin_turn("next").unwrap();
        assert!(m.abandon("half"));
        assert!(matches!(m.failure(), Some(f) if f.kind == FailureKind::Cancelled));
    }

    #[test]
    fn test_tool_refs_attached_to_final_turn() {
        let mut m = ContinuationMachine::default();
        m.begin_turn("hi").unwrap();
        let refs = vec![ToolCallRef {
            tool: "search".into(),
            success: true,
        }];
        m.apply_terminal(complete(json!({"assistant": "done"})), "", refs.clone());
        assert_eq!(m.history().last().unwrap().tool_calls, refs);
    }
}

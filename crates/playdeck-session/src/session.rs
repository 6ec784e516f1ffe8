//! The playground session: runs turns against a transport and owns all turn state

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use playdeck_wire::{
    ConversationTurn, CostBreakdown, EnvelopeStream, RateTable, ToolCallRecord, TurnRequest,
    UsageSnapshot,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    continuation::{ContinuationMachine, DEFAULT_MAX_AUTO_STEPS, TerminalOutcome, TurnPhase},
    error::{Error, Result},
    events::SessionEvent,
    failure::{FailureKind, TurnFailure},
    handle::SessionHandle,
    ledger::DISPLAY_COUNT,
    recorder::{Clipboard, DebugExport},
    router::EventRouter,
    tracker::UsageTracker,
    transport::Transport,
};

/// How long to keep reading after a terminal event for trailing
/// `usage` or diagnostic frames
pub const SETTLE_GRACE: Duration = Duration::from_millis(250);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent as `session_id`; keys the server-side history
    pub session_id: String,
    pub model: Option<String>,
    /// Free-form object sent as `context`
    pub context: Option<Value>,
    /// Use the buffered endpoint instead of the streaming one
    pub buffered: bool,
    pub max_auto_steps: u32,
    pub rates: RateTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            model: None,
            context: None,
            buffered: false,
            max_auto_steps: DEFAULT_MAX_AUTO_STEPS,
            rates: RateTable::builtin(),
        }
    }
}

/// Drives turns end to end.
///
/// All state lives here and is mutated only between stream reads, so there
/// is no locking around the router or the state machine.
pub struct PlaygroundSession {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    router: EventRouter,
    machine: ContinuationMachine,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl PlaygroundSession {
    /// Create a new session
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let tracker = UsageTracker::new(config.rates.clone(), config.model.clone());
        Self {
            router: EventRouter::new(tracker).with_events(event_tx.clone()),
            machine: ContinuationMachine::new(config.max_auto_steps),
            config,
            transport,
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Seed the conversation with previously saved turns
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.machine = ContinuationMachine::new(self.config.max_auto_steps).with_history(history);
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn phase(&self) -> &TurnPhase {
        self.machine.phase()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.machine.history()
    }

    pub fn usage(&self) -> Option<&UsageSnapshot> {
        self.router.usage()
    }

    pub fn cost(&self) -> Option<CostBreakdown> {
        self.router.cost()
    }

    /// The last few executed tools, oldest first
    pub fn recent_tools(&self) -> Vec<&ToolCallRecord> {
        self.router.recent_tools(DISPLAY_COUNT)
    }

    pub fn set_buffered(&mut self, buffered: bool) {
        self.config.buffered = buffered;
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.config.model = model;
    }

    pub fn set_rates(&mut self, rates: RateTable) {
        self.config.rates = rates.clone();
        self.router.set_rates(rates);
    }

    /// Flip the tools panel toggle; returns the new value
    pub fn toggle_tools_visible(&mut self) -> bool {
        let visible = !self.router.tools_visible();
        self.router.set_tools_visible(visible);
        visible
    }

    /// Start a new turn and run it until it completes, pauses or fails
    pub async fn send(&mut self, message: &str) -> Result<TerminalOutcome> {
        self.machine.begin_turn(message)?;
        self.router.begin_turn();
        Ok(self.run_turn().await)
    }

    /// Answer the paused turn and run it onward
    pub async fn resume(&mut self, user_input: &str) -> Result<TerminalOutcome> {
        self.machine.resume(user_input)?;
        Ok(self.run_turn().await)
    }

    /// Answer the paused turn with candidate number `index` (1-based)
    pub async fn pick(&mut self, index: usize) -> Result<TerminalOutcome> {
        let value = match self.machine.phase() {
            TurnPhase::AwaitingUserInput { prompt, .. } => prompt
                .pick(index)
                .map(str::to_string)
                .ok_or(Error::InvalidPick(index))?,
            TurnPhase::Streaming { .. } => return Err(Error::Busy),
            _ => return Err(Error::NothingToResume),
        };
        self.resume(&value).await
    }

    /// Drop a paused turn so an unrelated one can start
    pub fn abandon(&mut self) -> bool {
        let partial = self.router.assistant_text().to_string();
        self.machine.abandon(&partial)
    }

    /// Clear server-side history, then local state
    pub async fn clear_history(&mut self) -> Result<()> {
        if self.machine.phase().is_streaming() {
            return Err(Error::Busy);
        }
        self.transport
            .clear_session(&self.config.session_id)
            .await?;
        self.machine.clear()?;
        self.router.clear();
        let _ = self.event_tx.send(SessionEvent::HistoryCleared);
        Ok(())
    }

    /// The debug document for the current step
    pub fn debug_export(&self) -> DebugExport {
        self.router
            .debug_export(&self.config.session_id, &self.machine)
    }

    pub fn copy_debug(&self, clipboard: &dyn Clipboard) -> Result<String> {
        self.router
            .recorder()
            .copy_to_clipboard(&self.debug_export(), clipboard)
    }

    pub fn save_debug(&self, path: &Path) -> Result<PathBuf> {
        self.router
            .recorder()
            .download_as_file(&self.debug_export(), path)
    }

    /// Run steps until the turn leaves the streaming phase
    async fn run_turn(&mut self) -> TerminalOutcome {
        let outcome = loop {
            let request = self
                .machine
                .request(&self.config.session_id)
                .with_model(self.config.model.clone())
                .with_context(self.config.context.clone());
            let step = self.machine.step();

            let payload = serde_json::to_value(&request).unwrap_or(Value::Null);
            self.router.reset_step(payload, self.config.model.clone());
            let _ = self.event_tx.send(SessionEvent::TurnStarted {
                step,
                resumed: step > 1,
            });

            match self.run_step(&request).await {
                TerminalOutcome::ContinuePending { step } => {
                    tracing::debug!("Continuing automatically with step {}", step);
                    self.machine.advance_step();
                }
                outcome => break outcome,
            }
        };

        let event = match &outcome {
            TerminalOutcome::Completed { content } => Some(SessionEvent::TurnCompleted {
                content: content.clone(),
            }),
            TerminalOutcome::AwaitingUserInput(prompt) => {
                Some(SessionEvent::AwaitingUserInput(prompt.clone()))
            }
            TerminalOutcome::Failed(failure) => Some(SessionEvent::TurnFailed(failure.clone())),
            TerminalOutcome::ContinuePending { .. } => None,
        };
        if let Some(event) = event {
            let _ = self.event_tx.send(event);
        }
        outcome
    }

    /// Run one network request and settle it
    async fn run_step(&mut self, request: &TurnRequest) -> TerminalOutcome {
        let step = self.machine.step();
        let cancel = self.handle.arm();
        let outcome = self.stream_step(request, step, &cancel).await;
        self.handle.disarm();
        outcome
    }

    async fn stream_step(
        &mut self,
        request: &TurnRequest,
        step: u32,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> TerminalOutcome {
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            opened = self.open_stream(request) => Some(opened),
        };
        let mut stream = match opened {
            None => return self.cancelled(step),
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                tracing::warn!("Step {} failed before streaming: {}", step, e);
                return self.fail(TurnFailure::from_wire(&e, step));
            }
        };

        let mut settled: Option<TerminalOutcome> = None;
        loop {
            let draining = settled.is_some();
            let read = async {
                if draining {
                    // A server that keeps the connection open must not hold the turn
                    tokio::time::timeout(SETTLE_GRACE, stream.next())
                        .await
                        .unwrap_or(None)
                } else {
                    stream.next().await
                }
            };
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = read => Some(next),
            };
            let Some(next) = next else {
                return match settled {
                    Some(outcome) => outcome,
                    None => self.cancelled(step),
                };
            };

            match next {
                Some(Ok(envelope)) => {
                    let Some(terminal) = self.router.route(envelope) else {
                        continue;
                    };
                    let refs = self.router.turn_tool_refs();
                    let outcome =
                        self.machine
                            .apply_terminal(terminal, self.router.assistant_text(), refs);
                    if settled.is_none() {
                        settled = outcome;
                    }
                }
                Some(Err(e)) => {
                    if settled.is_some() {
                        tracing::warn!("Stream error after terminal event, ignoring: {}", e);
                        break;
                    }
                    tracing::warn!("Step {} stream failed: {}", step, e);
                    return self.fail(TurnFailure::from_wire(&e, step));
                }
                None => break,
            }
        }

        match settled {
            Some(outcome) => outcome,
            None => {
                let refs = self.router.turn_tool_refs();
                self.machine
                    .finish_stream(self.router.assistant_text(), refs)
                    .unwrap_or_else(|| {
                        TerminalOutcome::Failed(TurnFailure::new(
                            FailureKind::Incomplete,
                            "Turn was not streaming",
                            step,
                        ))
                    })
            }
        }
    }

    async fn open_stream(&self, request: &TurnRequest) -> playdeck_wire::Result<EnvelopeStream> {
        if self.config.buffered {
            self.transport.buffered_envelopes(request).await
        } else {
            self.transport.stream(request).await
        }
    }

    fn cancelled(&mut self, step: u32) -> TerminalOutcome {
        tracing::debug!("Step {} cancelled", step);
        self.fail(TurnFailure::new(FailureKind::Cancelled, "Cancelled", step))
    }

    fn fail(&mut self, failure: TurnFailure) -> TerminalOutcome {
        let partial = self.router.assistant_text().to_string();
        TerminalOutcome::Failed(self.machine.fail(failure, &partial))
    }
}

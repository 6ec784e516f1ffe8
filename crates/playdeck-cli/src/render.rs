//! Terminal rendering of session events

use std::io::{self, Write};

use playdeck_session::{DeltaChannel, SessionEvent};
use tokio::sync::{broadcast, mpsc};

/// Writes session events as plain text.
///
/// Assistant deltas stream to `out`; failures go to `err`. Reasoning and
/// thinking deltas are shown only when `show_reasoning` is set.
pub struct Renderer<W: Write, E: Write> {
    out: W,
    err: E,
    show_reasoning: bool,
    /// Assistant text printed during the current step
    streamed: String,
}

impl<W: Write, E: Write> Renderer<W, E> {
    pub fn new(out: W, err: E, show_reasoning: bool) -> Self {
        Self {
            out,
            err,
            show_reasoning,
            streamed: String::new(),
        }
    }

    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::TurnStarted { step, .. } => {
                if !self.streamed.is_empty() {
                    writeln!(self.out)?;
                }
                self.streamed.clear();
                if *step > 1 {
                    writeln!(self.out, "[step {}]", step)?;
                }
            }
            SessionEvent::Delta { channel, delta } => match channel {
                DeltaChannel::Assistant => {
                    write!(self.out, "{}", delta)?;
                    self.streamed.push_str(delta);
                }
                _ if self.show_reasoning => {
                    write!(self.err, "{}", delta)?;
                }
                _ => {}
            },
            SessionEvent::ToolExecuted(record) => {
                let status = if record.success { "ok" } else { "failed" };
                match record.duration_ms {
                    Some(ms) => writeln!(self.out, "\n[{} {} {}ms]", record.tool, status, ms)?,
                    None => writeln!(self.out, "\n[{} {}]", record.tool, status)?,
                }
            }
            SessionEvent::UsageUpdated(_) => {}
            SessionEvent::AwaitingUserInput(prompt) => {
                if !self.streamed.is_empty() {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "? {}", prompt.message)?;
                for (i, option) in prompt.options.iter().enumerate() {
                    writeln!(self.out, "  {}. {}", i + 1, option.label)?;
                }
                if !prompt.options.is_empty() {
                    writeln!(self.out, "Reply with text or /pick <n>.")?;
                }
                self.streamed.clear();
            }
            SessionEvent::TurnCompleted { content } => {
                // Authoritative content replaces a preview that drifted from it
                if self.streamed.is_empty() {
                    writeln!(self.out, "{}", content)?;
                } else if self.streamed.trim_end() != content.trim_end() {
                    writeln!(self.out, "\n---\n{}", content)?;
                } else {
                    writeln!(self.out)?;
                }
                self.streamed.clear();
            }
            SessionEvent::TurnFailed(failure) => {
                if !self.streamed.is_empty() {
                    writeln!(self.out)?;
                }
                writeln!(self.err, "Error: {}", failure)?;
                self.streamed.clear();
            }
            SessionEvent::HistoryCleared => {
                self.streamed.clear();
            }
        }
        self.out.flush()?;
        self.err.flush()
    }
}

/// Render events until the session goes away.
///
/// Every terminal event is acknowledged on `done_tx` once printed, so the
/// caller can wait before showing its own prompt.
pub fn spawn_renderer(
    mut receiver: broadcast::Receiver<SessionEvent>,
    show_reasoning: bool,
    done_tx: mpsc::UnboundedSender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = Renderer::new(io::stdout(), io::stderr(), show_reasoning);
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = renderer.render(&event) {
                        tracing::warn!("Failed to render event: {}", e);
                    }
                    if event.is_terminal() {
                        let _ = done_tx.send(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Renderer skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

//! Slash commands for interactive mode

mod debug;
mod usage;

pub use debug::SystemClipboard;
pub use usage::{format_tools, format_usage};

use std::path::PathBuf;

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the server)
    Message(String),
    /// Clear server-side and local history
    Clear,
    /// Show the usage snapshot and its cost
    Usage,
    /// Show recent tool calls and toggle tool visibility
    Tools,
    /// Print the debug document and report it as copied
    DebugCopy,
    /// Write the debug document to a file or directory
    DebugSave(Option<PathBuf>),
    /// Abandon a paused turn
    Cancel,
    /// Answer a paused turn with a listed candidate (1-based)
    Pick(usize),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "usage" | "u" => CommandResult::Usage,

        "tools" => CommandResult::Tools,

        "debug" | "d" => debug::parse(args),

        "cancel" => CommandResult::Cancel,

        "pick" | "p" => match args.parse::<usize>() {
            Ok(n) if n > 0 => CommandResult::Pick(n),
            _ => CommandResult::Message("Usage: /pick <number>".to_string()),
        },

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

pub fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?         Show this help message
  /usage, /u            Show token usage and estimated cost
  /tools                Show recent tool calls and toggle them in debug exports
  /debug copy           Print the debug document
  /debug save [path]    Save the debug document (file or directory)
  /pick, /p <n>         Answer a paused turn with candidate n
  /cancel               Abandon a paused turn
  /clear, /c            Clear server-side and local history
  /quit, /exit, /q      Exit playdeck

While a turn is paused, any other line is sent as the answer."#
        .to_string()
}

//! /debug command

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use playdeck_session::{Clipboard, Error, Result};

use super::CommandResult;

pub(super) fn parse(args: &str) -> CommandResult {
    let mut parts = args.splitn(2, ' ');
    match parts.next().unwrap_or("") {
        "" | "copy" => CommandResult::DebugCopy,
        "save" => CommandResult::DebugSave(
            parts
                .next()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        ),
        other => CommandResult::Message(format!(
            "Unknown debug action: {} (use copy or save)",
            other
        )),
    }
}

/// The system clipboard, or stdout when no clipboard is reachable
/// (headless sessions, SSH without a display).
#[derive(Debug, Default)]
pub struct SystemClipboard {
    printed: AtomicBool,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last copy went to stdout instead of the clipboard
    pub fn printed(&self) -> bool {
        self.printed.load(Ordering::Relaxed)
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let system = |text: &str| {
            arboard::Clipboard::new()
                .and_then(|mut clipboard| clipboard.set_text(text))
                .map_err(|e| e.to_string())
        };
        let printed = copy_or_print(text, system, &mut std::io::stdout().lock())
            .map_err(|e| Error::Export(e.to_string()))?;
        self.printed.store(printed, Ordering::Relaxed);
        Ok(())
    }
}

/// Try `system`; write to `out` if it fails. Returns whether `out` was used.
fn copy_or_print<F, W>(text: &str, system: F, out: &mut W) -> std::io::Result<bool>
where
    F: FnOnce(&str) -> std::result::Result<(), String>,
    W: Write,
{
    match system(text) {
        Ok(()) => Ok(false),
        Err(e) => {
            tracing::debug!("Clipboard unavailable, printing instead: {}", e);
            writeln!(out, "{}", text)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!(parse("copy"), CommandResult::DebugCopy);
        assert_eq!(parse("save"), CommandResult::DebugSave(None));
        assert_eq!(
            parse("save  out dir/x.json"),
            CommandResult::DebugSave(Some(PathBuf::from("out dir/x.json")))
        );
        assert!(matches!(parse("dump"), CommandResult::Message(_)));
    }

    #[test]
    fn test_copy_uses_system_clipboard_when_available() {
        let mut copied = None;
        let mut out = Vec::new();
        let printed = copy_or_print(
            "{\"a\":1}",
            |text| {
                copied = Some(text.to_string());
                Ok(())
            },
            &mut out,
        )
        .unwrap();
        assert!(!printed);
        assert_eq!(copied.as_deref(), Some("{\"a\":1}"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_copy_falls_back_to_output() {
        let mut out = Vec::new();
        let printed =
            copy_or_print("{}", |_| Err("no display".to_string()), &mut out).unwrap();
        assert!(printed);
        assert_eq!(out, b"{}\n");
    }
}

//! Transcript store: finalized turns saved as JSONL, one file per session

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use playdeck_wire::ConversationTurn;

/// Session entry types for JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    /// Session metadata, always the first line
    Metadata {
        id: String,
        created_at: i64,
        model: String,
        base_url: String,
    },
    /// A finalized conversation turn
    Turn {
        turn: ConversationTurn,
        timestamp: i64,
    },
}

/// Session manager for persisting conversations
pub struct SessionManager {
    id: String,
    path: PathBuf,
    /// Serialized metadata line, rewritten when the transcript is reset
    header: String,
    writer: BufWriter<File>,
    /// Turns of the live history already on disk
    persisted: usize,
}

impl SessionManager {
    /// Get the sessions directory
    pub fn sessions_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playdeck")
            .join("sessions")
    }

    /// Create a new session file under the default directory
    pub fn new(id: &str, model: &str, base_url: &str) -> std::io::Result<Self> {
        Self::create_in(&Self::sessions_dir(), id, model, base_url)
    }

    /// Load an existing session from the default directory
    pub fn load(id: &str) -> std::io::Result<(Self, Vec<ConversationTurn>)> {
        Self::load_from(&Self::sessions_dir(), id)
    }

    /// List sessions in the default directory, newest first
    pub fn list_sessions() -> std::io::Result<Vec<SessionInfo>> {
        Self::list_in(&Self::sessions_dir())
    }

    pub fn create_in(dir: &Path, id: &str, model: &str, base_url: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;

        let metadata = SessionEntry::Metadata {
            id: id.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            model: model.to_string(),
            base_url: base_url.to_string(),
        };
        let path = dir.join(format!("{}.jsonl", id));
        let header = serde_json::to_string(&metadata)?;
        let writer = Self::write_header(&path, &header)?;

        Ok(Self {
            id: id.to_string(),
            path,
            header,
            writer,
            persisted: 0,
        })
    }

    /// Truncate `path` to just the metadata line
    fn write_header(path: &Path, header: &str) -> std::io::Result<BufWriter<File>> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", header)?;
        writer.flush()?;
        Ok(writer)
    }

    pub fn load_from(dir: &Path, id: &str) -> std::io::Result<(Self, Vec<ConversationTurn>)> {
        let path = dir.join(format!("{}.jsonl", id));

        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Session not found: {}", id),
            ));
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut turns = Vec::new();
        let mut header = None;

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(SessionEntry::Turn { turn, .. }) => turns.push(turn),
                Ok(SessionEntry::Metadata { .. }) => {
                    header.get_or_insert(line);
                }
                Err(e) => tracing::warn!("Skipping unreadable transcript line: {}", e),
            }
        }

        let header = match header {
            Some(header) => header,
            None => serde_json::to_string(&SessionEntry::Metadata {
                id: id.to_string(),
                created_at: chrono::Utc::now().timestamp_millis(),
                model: String::new(),
                base_url: String::new(),
            })?,
        };
        let file = File::options().append(true).open(&path)?;
        Ok((
            Self {
                id: id.to_string(),
                path,
                header,
                writer: BufWriter::new(file),
                persisted: turns.len(),
            },
            turns,
        ))
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append one turn
    pub fn append_turn(&mut self, turn: &ConversationTurn) -> std::io::Result<()> {
        let entry = SessionEntry::Turn {
            turn: turn.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        writeln!(self.writer, "{}", serde_json::to_string(&entry)?)?;
        self.writer.flush()
    }

    /// Append the finalized turns of `history` not yet on disk.
    ///
    /// A still-streaming tail is left for a later call. Returns how many
    /// turns were written.
    pub fn sync(&mut self, history: &[ConversationTurn]) -> std::io::Result<usize> {
        if history.len() < self.persisted {
            // History was cleared behind our back
            self.reset()?;
        }
        let mut written = 0;
        for turn in &history[self.persisted..] {
            if turn.streaming {
                break;
            }
            self.append_turn(turn)?;
            written += 1;
        }
        self.persisted += written;
        Ok(written)
    }

    /// Drop every saved turn, keeping the metadata line
    pub fn reset(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.writer = Self::write_header(&self.path, &self.header)?;
        self.persisted = 0;
        Ok(())
    }

    pub fn list_in(dir: &Path) -> std::io::Result<Vec<SessionInfo>> {
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(info) = Self::read_session_info(&path) {
                    sessions.push(info);
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(sessions)
    }

    fn read_session_info(path: &Path) -> Option<SessionInfo> {
        let file = File::open(path).ok()?;
        let mut lines = BufReader::new(file).lines().map_while(Result::ok);
        let first_line = lines.next()?;

        if let Ok(SessionEntry::Metadata {
            id,
            created_at,
            model,
            base_url,
        }) = serde_json::from_str(&first_line)
        {
            let turn_count = lines
                .filter(|l| l.contains("\"type\":\"turn\""))
                .count();

            Some(SessionInfo {
                id,
                created_at,
                model,
                base_url,
                turn_count,
            })
        } else {
            None
        }
    }
}

/// Information about a saved session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: i64,
    pub model: String,
    pub base_url: String,
    pub turn_count: usize,
}

impl SessionInfo {
    /// Format the created_at timestamp for display
    pub fn created_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

//! The exchange log and its on-disk copy.
//!
//! Entries serialise as `{"role": "user"|"assistant", "content": "..."}`,
//! which is both the persisted format and the `conversationHistory` wire
//! format of the chat service.  The log is append-only: nothing in the crate
//! edits or reorders an entry once pushed.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ExchangeLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEntry {
    #[serde(rename = "role")]
    pub speaker: Speaker,
    #[serde(rename = "content")]
    pub text: String,
}

impl ExchangeEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeLog {
    entries: Vec<ExchangeEntry>,
}

impl ExchangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ExchangeEntry>) -> Self {
        Self { entries }
    }

    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(ExchangeEntry::new(speaker, text));
    }

    pub fn entries(&self) -> &[ExchangeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ExchangeEntry> {
        self.entries.last()
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// JSON file holding the exchange log between runs.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved log.  A missing file is an empty log; so is an
    /// unreadable or corrupt one, with a warning.
    pub fn load(&self) -> ExchangeLog {
        if !self.path.exists() {
            return ExchangeLog::new();
        }
        let parsed = std::fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|content| {
                serde_json::from_str::<Vec<ExchangeEntry>>(&content).map_err(anyhow::Error::from)
            });
        match parsed {
            Ok(entries) => {
                log::debug!("history: loaded {} entries", entries.len());
                ExchangeLog::from_entries(entries)
            }
            Err(e) => {
                log::warn!(
                    "history: ignoring unreadable {} ({e}); starting empty",
                    self.path.display()
                );
                ExchangeLog::new()
            }
        }
    }

    pub fn save(&self, log: &ExchangeLog) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(log.entries())?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

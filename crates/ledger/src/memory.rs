use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lodestar_core::{content_hash, short_id};

use crate::error::{IoContext, Result};
use crate::jsonl::{read_jsonl, JsonlWriter};

/// How many trailing entries a session read considers.
pub const MAX_SESSION_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Single model, draft driven through verify/critique/refine.
    Governed,
    /// Several models answer the same prompt; the reply is arbitrated by vote.
    Multi,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Governed => "governed",
            AnswerMode::Multi => "multi",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "governed" => Some(AnswerMode::Governed),
            "multi" => Some(AnswerMode::Multi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub session_id: String,
    pub mode: AnswerMode,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_notes: Option<Value>,
}

/// Append-only per-session turn log plus a mutable per-session summary.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    dir: PathBuf,
}

impl MemoryLog {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref().join("sessions");
        fs::create_dir_all(&dir).at(&dir)?;
        Ok(Self { dir })
    }

    pub fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let path = self.log_path(&entry.session_id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .at(&path)?;
        JsonlWriter::new(file).write_record(entry).at(&path)
    }

    /// Up to `limit` most recent entries, oldest first.
    pub fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries: Vec<MemoryEntry> = read_jsonl(&self.log_path(session_id))?;
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    pub fn get_session_summary(&self, session_id: &str) -> Result<Option<String>> {
        let path = self.summary_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path).at(&path).map(Some)
    }

    pub fn set_session_summary(&self, session_id: &str, text: &str) -> Result<()> {
        let path = self.summary_path(session_id);
        fs::write(&path, text).at(&path)
    }

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_stem(session_id)))
    }

    fn summary_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.summary.txt", session_stem(session_id)))
    }
}

const SESSION_PREFIX_CHARS: usize = 48;

/// File stem for a session: a readable prefix plus a hash of the exact id, so ids
/// that sanitize alike never share files.
fn session_stem(session_id: &str) -> String {
    format!(
        "{}-{}",
        sanitize_session(session_id),
        short_id(&content_hash(session_id))
    )
}

fn sanitize_session(session_id: &str) -> String {
    let cleaned: String = session_id
        .trim()
        .chars()
        .take(SESSION_PREFIX_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

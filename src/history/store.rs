//! Append-only per-session turn log with a bounded prompt window
//!
//! The persisted log keeps every turn for audit; the in-memory window is
//! what prompt construction sees and is trimmed against the configured
//! budget. Turns enter the store only once they reach a terminal status,
//! so trimming can never touch an in-progress turn.

use crate::config::HistoryConfig;
use crate::history::types::{Exchange, Turn};
use crate::{ConfabError, Result, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Persistence backend for the per-session turn log
pub trait TurnLog: Send + Sync {
    /// Append one terminal turn to the session's log
    fn append(&self, session_id: SessionId, turn: &Turn) -> Result<()>;

    /// Load all turns for a session in chronological order
    fn load(&self, session_id: SessionId) -> Result<Vec<Turn>>;

    /// Drop the session's log entirely
    fn remove(&self, session_id: SessionId) -> Result<()>;
}

/// In-memory turn log
#[derive(Debug, Default)]
pub struct MemoryTurnLog {
    turns: RwLock<HashMap<SessionId, Vec<Turn>>>,
}

impl MemoryTurnLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnLog for MemoryTurnLog {
    fn append(&self, session_id: SessionId, turn: &Turn) -> Result<()> {
        self.turns
            .write()
            .entry(session_id)
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    fn load(&self, session_id: SessionId) -> Result<Vec<Turn>> {
        Ok(self.turns.read().get(&session_id).cloned().unwrap_or_default())
    }

    fn remove(&self, session_id: SessionId) -> Result<()> {
        self.turns.write().remove(&session_id);
        Ok(())
    }
}

/// File-backed turn log: one append-only JSONL file per session id
#[derive(Debug)]
pub struct JsonlTurnLog {
    dir: PathBuf,
}

impl JsonlTurnLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }
}

impl TurnLog for JsonlTurnLog {
    fn append(&self, session_id: SessionId, turn: &Turn) -> Result<()> {
        let line = serde_json::to_string(turn)
            .map_err(|e| ConfabError::StorageError(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn load(&self, session_id: SessionId) -> Result<Vec<Turn>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(path)?;
        let mut turns = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!("skipping corrupt turn record: {e}"),
            }
        }
        Ok(turns)
    }

    fn remove(&self, session_id: SessionId) -> Result<()> {
        let path = self.path_for(session_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Bounded per-session prompt window kept by a session
#[derive(Debug, Default)]
struct SessionHistory {
    turns: Vec<Turn>,
    summary: Option<String>,
}

/// Conversation history store: persists every turn through the configured
/// `TurnLog` and maintains the trimmed prompt window per session.
pub struct HistoryStore {
    log: Arc<dyn TurnLog>,
    config: HistoryConfig,
    sessions: RwLock<HashMap<SessionId, SessionHistory>>,
}

impl HistoryStore {
    pub fn new(log: Arc<dyn TurnLog>, config: HistoryConfig) -> Self {
        Self {
            log,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Append a terminal turn: persist it, then trim the prompt window
    /// down to budget. Context overflow is handled here by silent
    /// trimming, never surfaced as an error.
    pub fn append(&self, session_id: SessionId, turn: Turn) -> Result<()> {
        self.log.append(session_id, &turn)?;

        let mut sessions = self.sessions.write();
        let history = sessions.entry(session_id).or_default();
        history.turns.push(turn);
        Self::trim(history, &self.config);
        Ok(())
    }

    /// Turns currently in the prompt window, chronological
    pub fn turns(&self, session_id: SessionId) -> Vec<Turn> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|h| h.turns.clone())
            .unwrap_or_default()
    }

    /// Completed exchanges plus any rolling summary, for prompt construction.
    /// Failed turns stay in the audit log but contribute nothing here.
    pub fn context(&self, session_id: SessionId) -> (Option<String>, Vec<Exchange>) {
        let sessions = self.sessions.read();
        match sessions.get(&session_id) {
            Some(history) => {
                let exchanges = history
                    .turns
                    .iter()
                    .filter(|t| t.is_completed())
                    .map(Exchange::from)
                    .collect();
                (history.summary.clone(), exchanges)
            }
            None => (None, Vec::new()),
        }
    }

    /// Load the full persisted log for a session (audit view)
    pub fn load(&self, session_id: SessionId) -> Result<Vec<Turn>> {
        self.log.load(session_id)
    }

    /// Release the in-memory window. The persisted log is kept.
    pub fn close(&self, session_id: SessionId) {
        self.sessions.write().remove(&session_id);
    }

    /// Drop both the window and the persisted log
    pub fn remove(&self, session_id: SessionId) -> Result<()> {
        self.sessions.write().remove(&session_id);
        self.log.remove(session_id)
    }

    fn over_budget(history: &SessionHistory, config: &HistoryConfig) -> bool {
        if history.turns.len() > config.max_turns {
            return true;
        }
        let tokens: usize = history.turns.iter().map(Turn::estimated_tokens).sum();
        tokens > config.max_context_tokens
    }

    /// Evict oldest completed turns first until back under budget.
    fn trim(history: &mut SessionHistory, config: &HistoryConfig) {
        while history.turns.len() > 1 && Self::over_budget(history, config) {
            let victim = history
                .turns
                .iter()
                .position(Turn::is_completed)
                .unwrap_or(0);
            let evicted = history.turns.remove(victim);
            debug!(
                ordinal = evicted.ordinal,
                "evicting turn from prompt window"
            );
            if config.summarize_evicted && evicted.is_completed() {
                let digest = Self::digest(&evicted);
                match &mut history.summary {
                    Some(summary) => {
                        summary.push(' ');
                        summary.push_str(&digest);
                    }
                    None => history.summary = Some(digest),
                }
            }
        }
    }

    /// Cheap textual digest of an evicted exchange
    fn digest(turn: &Turn) -> String {
        let first_sentence = |text: &str| -> String {
            text.split_inclusive(['.', '!', '?'])
                .next()
                .unwrap_or(text)
                .trim()
                .to_string()
        };
        format!(
            "User asked: {} Assistant replied: {}",
            first_sentence(&turn.transcript),
            first_sentence(&turn.response)
        )
    }
}

//! File-backed history persistence.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;

use crate::constants::{HISTORY_FILE, MAX_HISTORY};
use crate::models::{HistoryEntry, PreparedRequest, ResponseSummary};
use crate::pipeline::HistoryStore;

/// Bounded history of finished executions, persisted as YAML under the
/// config directory. Newest first.
pub struct FileHistoryStore {
    history: VecDeque<HistoryEntry>,
    config_dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".waypost");
        Self::with_dir(config_dir)
    }

    /// Open a store rooted at an explicit directory.
    pub fn with_dir(config_dir: PathBuf) -> Self {
        let mut store = FileHistoryStore {
            history: VecDeque::with_capacity(MAX_HISTORY),
            config_dir,
        };
        // Missing or unreadable history starts empty.
        let _ = store.load();
        store
    }

    fn history_path(&self) -> PathBuf {
        self.config_dir.join(HISTORY_FILE)
    }

    fn load(&mut self) -> Result<()> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(path)?;
        let entries: Vec<HistoryEntry> = serde_yaml::from_str(&content)?;
        self.history = entries.into_iter().collect();
        self.history.truncate(MAX_HISTORY);
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir)?;
        }
        let entries: Vec<&HistoryEntry> = self.history.iter().collect();
        let content = serde_yaml::to_string(&entries)?;
        fs::write(self.history_path(), content)?;
        Ok(())
    }

    /// Get history item by index (0 = most recent)
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.history.get(index)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for FileHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for FileHistoryStore {
    fn append(&mut self, request: &PreparedRequest, summary: &ResponseSummary) -> Result<()> {
        self.history.push_front(HistoryEntry {
            request: request.clone(),
            summary: summary.clone(),
            timestamp: Utc::now(),
        });
        self.history.truncate(MAX_HISTORY);
        self.save()
    }
}

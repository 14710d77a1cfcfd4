//! Persistence configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// State snapshot written after every cycle and manual reset.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Directory for `cycles_*.jsonl` and `positions_*.jsonl`.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
    /// Records buffered before a journal flush.
    #[serde(default = "default_journal_buffer")]
    pub journal_buffer: usize,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state.json")
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_journal_buffer() -> usize {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            journal_dir: default_journal_dir(),
            journal_buffer: default_journal_buffer(),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.state_path.as_os_str().is_empty() {
            return Err("state_path must be set".to_string());
        }
        if self.journal_buffer == 0 {
            return Err("journal_buffer must be at least 1".to_string());
        }
        Ok(())
    }
}

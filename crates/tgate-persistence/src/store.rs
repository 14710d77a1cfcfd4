//! Atomic JSON state snapshots.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};

/// Whole-state snapshot on disk.
///
/// `save` writes a sibling temp file, syncs it and renames it over the
/// target, so a crash mid-write leaves the previous snapshot intact.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn save<T: Serialize>(&self, state: &T) -> PersistenceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    /// Load the snapshot. `Ok(None)` when no snapshot exists yet.
    pub fn load<T: DeserializeOwned>(&self) -> PersistenceResult<Option<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&content).map_err(|e| PersistenceError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(path = %self.path.display(), "State loaded");
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counters {
        cycle: u64,
        halted: bool,
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));

        assert_eq!(store.load::<Counters>().unwrap(), None);

        store.save(&Counters { cycle: 3, halted: true }).unwrap();
        store.save(&Counters { cycle: 4, halted: false }).unwrap();

        let loaded: Counters = store.load().unwrap().unwrap();
        assert_eq!(loaded, Counters { cycle: 4, halted: false });
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ truncated").unwrap();

        let err = StateStore::new(&path).load::<Counters>().unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }
}

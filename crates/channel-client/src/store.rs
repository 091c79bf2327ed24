//! Persistence backends for the local move ledger.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::ledger::LedgerSnapshot;

/// Durable storage for a [`LedgerSnapshot`]. `save` must not return until the
/// snapshot is as durable as the backend can make it.
pub trait MoveStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, StoreError>;

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StoreError>;
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Option<LedgerSnapshot>,
    saves: usize,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Option<&LedgerSnapshot> {
        self.snapshot.as_ref()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Make subsequent saves fail with an i/o error.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl MoveStore for MemoryStore {
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if self.failing {
            return Err(io::Error::other("memory store is failing").into());
        }
        self.snapshot = Some(snapshot.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Stores the snapshot as a JSON file.
///
/// Writes go to a sibling temp file which is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    fsync: bool,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: true,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MoveStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<LedgerSnapshot>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
            if self.fsync {
                writer.get_ref().sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), games = snapshot.games.len(), "ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LocalMoveRecord;
    use chess_rules::Side;
    use tempfile::TempDir;

    fn snapshot_with_game(game_id: u32) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .games
            .insert(game_id, LocalMoveRecord::new(game_id, Side::Black));
        snapshot
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("ledger.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ledger.json");
        let mut store = JsonFileStore::new(&path);
        store.save(&snapshot_with_game(4)).unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());

        let mut reopened = JsonFileStore::new(&path).with_fsync(false);
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot_with_game(4));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{ not json").unwrap();
        let mut store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Serde(_))));
    }

    #[test]
    fn failing_memory_store_keeps_previous_snapshot() {
        let mut store = MemoryStore::new();
        store.save(&snapshot_with_game(1)).unwrap();
        store.set_failing(true);
        assert!(store.save(&snapshot_with_game(2)).is_err());
        assert_eq!(store.saves(), 1);
        assert_eq!(store.snapshot(), Some(&snapshot_with_game(1)));
    }
}

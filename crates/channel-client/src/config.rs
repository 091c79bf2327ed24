use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::JsonFileStore;

/// Client-side settings. Every field has a default, so an empty JSON object
/// is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Where the local move ledger is kept.
    pub ledger_path: PathBuf,
    /// Flush the ledger file to disk before every save returns.
    pub fsync: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("chess-channel-ledger.json"),
            fsync: true,
        }
    }
}

impl ClientConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn open_store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.ledger_path).with_fsync(self.fsync)
    }
}

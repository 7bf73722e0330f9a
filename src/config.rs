//! Per-database settings
//!
//! Stored as pretty JSON next to the database file: `state.ntrie` keeps its
//! settings in `state.ntrie.config`.

use crate::node::StateVersion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_compress() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Settings for a trie database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieConfig {
    /// Layout used to encode values
    #[serde(default)]
    pub state_version: StateVersion,
    /// Compress stored blobs with zstd
    #[serde(default = "default_compress")]
    pub compress: bool,
    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            state_version: StateVersion::default(),
            compress: default_compress(),
            log_level: default_log_level(),
        }
    }
}

impl TrieConfig {
    /// Load the config for a database, defaults if none was saved
    pub fn load(db_path: &Path) -> crate::Result<Self> {
        let config_path = Self::config_path(db_path);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the config next to a database
    pub fn save(&self, db_path: &Path) -> crate::Result<()> {
        let config_path = Self::config_path(db_path);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Get the config file path for a database
    pub fn config_path(db_path: &Path) -> PathBuf {
        let mut config_path = db_path.to_path_buf();
        let file_name = db_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.ntrie".to_string());
        config_path.set_file_name(format!("{}.config", file_name));
        config_path
    }
}

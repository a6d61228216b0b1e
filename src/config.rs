use crate::classifier::HostPattern;
use crate::clock::{Millis, IDLE_THRESHOLD_MS};
use crate::history::DEFAULT_HISTORY_LIMIT;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Live snapshot cadence
pub const BROADCAST_INTERVAL_MS: Millis = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub idle_threshold_ms: Millis,
    pub broadcast_interval_ms: Millis,
    pub history_limit: usize,
    /// Canvas editors to treat as typing surfaces on top of the built-in ones
    pub extra_editor_hosts: Vec<HostPattern>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_threshold_ms: IDLE_THRESHOLD_MS,
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            extra_editor_hosts: Vec::new(),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> Result<(), ConfigError>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "keypace") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("keypace_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Config, ConfigError> {
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice::<Config>(&bytes)?)
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// Falls back to defaults when the file is missing or unreadable.
    fn load(&self) -> Config {
        match self.try_load() {
            Ok(cfg) => cfg,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "using default config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            idle_threshold_ms: 3_000,
            broadcast_interval_ms: 500,
            history_limit: 25,
            extra_editor_hosts: vec![HostPattern::new("notes.example", &["/edit/"])],
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("absent.json"));
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn garbage_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = FileConfigStore::with_path(&path);
        assert!(matches!(store.try_load(), Err(ConfigError::Parse(_))));
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{ "history_limit": 5 }"#).unwrap();
        let loaded = FileConfigStore::with_path(&path).load();
        assert_eq!(loaded.history_limit, 5);
        assert_eq!(loaded.idle_threshold_ms, IDLE_THRESHOLD_MS);
        assert_eq!(loaded.broadcast_interval_ms, BROADCAST_INTERVAL_MS);
    }
}

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use tracing::debug;

pub(crate) mod defaults;
pub mod logger;
pub mod poll;

pub use defaults::DEFAULT_UPGRADE_KEY;
pub use logger::{LogLevel, LoggerConfig};
pub use poll::PollConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(skip_serializing)]
    path: Option<Utf8PathBuf>,

    /// Startup poll for a host binding that attaches late
    #[serde(default)]
    pub poll: PollConfig,

    /// Reserved key marking a payload as "billing upgrade required"
    #[serde(default = "defaults::default_upgrade_key")]
    pub upgrade_key: String,

    /// Logger configuration
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll: PollConfig::default(),
            upgrade_key: defaults::default_upgrade_key(),
            logger: LoggerConfig::default(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn with_path(mut self, path: &Utf8PathBuf) -> Self {
        self.path = Some(path.clone());
        self
    }

    pub fn path(&self) -> Utf8PathBuf {
        self.path.clone().unwrap_or(Self::default_path())
    }

    /// Default config path is ./widget-bridge.json
    pub fn default_path() -> Utf8PathBuf {
        Utf8PathBuf::new().join("widget-bridge.json")
    }

    /// Loads config from a json file
    ///
    /// # Errors
    ///
    /// This function will return an error if the config path does not exist or the content is invalid
    pub fn load(path: &Utf8PathBuf) -> Result<Self> {
        debug!("Loading config from {path}");

        if !path.exists() {
            anyhow::bail!("Config file does not exist: {path}");
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed reading config: {path} "))?;

        let mut cfg: Self =
            serde_json::from_str(&contents).context(format!("Failed loading config: {path} "))?;
        cfg.path = Some(path.clone());

        if cfg.upgrade_key.trim().is_empty() {
            anyhow::bail!("Invalid config {path}: upgrade_key must not be empty");
        }

        Ok(cfg)
    }

    /// Loads config from a json file, falling back on defaults when the
    /// default path is requested and no file exists there
    ///
    /// # Errors
    ///
    /// This function will return an error if an explicitly requested file is missing or invalid
    pub fn load_or_default(path: &Utf8PathBuf) -> Result<Self> {
        if *path == Self::default_path() && !path.exists() {
            debug!("No config at {path}, using defaults");
            return Ok(Self::default().with_path(path));
        }

        Self::load(path)
    }

    /// Saves config to its json file
    ///
    /// # Errors
    /// This function will error if it fails writing the config
    pub fn save(&self) -> Result<()> {
        let dest = self.path();
        debug!("Saving config to {dest}");
        let contents = serde_json::to_string_pretty(self).unwrap_or(json!(self).to_string());

        fs::write(&dest, contents).context(format!("Failed writing config: {dest}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.poll, PollConfig::default());
        assert_eq!(cfg.poll.interval_ms, 50);
        assert_eq!(cfg.poll.max_attempts, 100);
        assert_eq!(cfg.upgrade_key, "_joai/upgrade");
        assert!(cfg.logger.enabled);
        assert_eq!(cfg.logger.level, LogLevel::Info);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "bridge.json");

        let mut cfg = BridgeConfig::default().with_path(&path);
        cfg.poll.max_attempts = 7;
        cfg.upgrade_key = "acme/upgrade".into();
        cfg.save().unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded.poll.max_attempts, 7);
        assert_eq!(loaded.upgrade_key, "acme/upgrade");
        assert_eq!(loaded.path(), path);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "missing.json");

        let err = BridgeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_rejects_empty_upgrade_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "bridge.json");
        fs::write(&path, r#"{ "upgrade_key": "  " }"#).unwrap();

        assert!(BridgeConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_or_default_requires_explicit_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "explicit.json");

        assert!(BridgeConfig::load_or_default(&path).is_err());
    }
}

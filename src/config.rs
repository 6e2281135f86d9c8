//! Engine configuration, read from `~/.surveyflow/config.toml` by default.
//!
//! Every section and field is optional; a missing file yields the defaults.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Conversation engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Idle time after which an active conversation expires on next access.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    /// Idle per-respondent locks are pruned once the map reaches this size.
    #[serde(default = "default_lock_prune_threshold")]
    pub lock_prune_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            lock_prune_threshold: default_lock_prune_threshold(),
        }
    }
}

impl EngineConfig {
    pub fn inactivity_window(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

const fn default_inactivity_timeout_secs() -> u64 {
    1800
}

const fn default_lock_prune_threshold() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of survey definition `*.toml` files.
    #[serde(default = "default_surveys_dir")]
    pub surveys_dir: String,
    /// SQLite database for conversation state.
    #[serde(default = "default_state_db")]
    pub state_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            surveys_dir: default_surveys_dir(),
            state_db: default_state_db(),
        }
    }
}

impl StorageConfig {
    pub fn surveys_dir(&self) -> PathBuf {
        expand_path(&self.surveys_dir)
    }

    pub fn state_db(&self) -> PathBuf {
        expand_path(&self.state_db)
    }
}

fn default_surveys_dir() -> String {
    "~/.surveyflow/surveys".into()
}

fn default_state_db() -> String {
    "~/.surveyflow/state.db".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

impl Config {
    /// `~/.surveyflow/config.toml`, if a home directory can be found.
    pub fn default_path() -> Option<PathBuf> {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".surveyflow").join("config.toml"))
    }

    /// Load from `path`, or from [`Config::default_path`] when `None`.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_source(path).map(|(config, _)| config)
    }

    /// Like [`Config::load`], also returning the file that was read, or
    /// `None` when defaults were used. Runs before logging is set up, so
    /// callers report the source themselves.
    pub fn load_with_source(path: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match path {
            Some(p) => expand_path(&p.to_string_lossy()),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok((Self::default(), None)),
            },
        };

        if !path.exists() {
            return Ok((Self::default(), None));
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok((config, Some(path)))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.inactivity_timeout_secs == 0 {
            anyhow::bail!("engine.inactivity_timeout_secs must be greater than zero");
        }
        if self.storage.surveys_dir.trim().is_empty() {
            anyhow::bail!("storage.surveys_dir must not be empty");
        }
        if self.log.level.parse::<tracing::Level>().is_err() {
            anyhow::bail!("log.level '{}' is not a valid level", self.log.level);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.engine.inactivity_timeout_secs, 1800);
        assert_eq!(config.engine.lock_prune_threshold, 1024);
        assert_eq!(config.engine.inactivity_window(), Duration::from_secs(1800));
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[engine]\ninactivity_timeout_secs = 60\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.engine.inactivity_timeout_secs, 60);
        assert_eq!(config.engine.lock_prune_threshold, 1024);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(Some(&tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_reports_which_file_was_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let (_, source) = Config::load_with_source(Some(&path)).unwrap();
        assert_eq!(source, None);

        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        let (config, source) = Config::load_with_source(Some(&path)).unwrap();
        assert_eq!(config.log.level, "warn");
        assert_eq!(source, Some(path));
    }

    #[test]
    fn zero_timeout_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[engine]\ninactivity_timeout_secs = 0\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("inactivity_timeout_secs"));
    }

    #[test]
    fn empty_surveys_dir_rejected() {
        let mut config = Config::default();
        config.storage.surveys_dir = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_log_level_rejected() {
        let mut config = Config::default();
        config.log.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tilde_paths_expand() {
        let storage = StorageConfig::default();
        assert!(storage.surveys_dir().ends_with(".surveyflow/surveys"));
        assert!(storage.state_db().ends_with(".surveyflow/state.db"));
    }

    #[test]
    fn toml_output_parses_back() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}

//! Configuration file parser for `feedmail.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ledger::DEFAULT_RECORD_MAX;
use crate::resource::{DEFAULT_CONCURRENCY, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_HEAD_TIMEOUT};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "feedmail.toml";

const KNOWN_KEYS: &[&str] = &[
    "cache_dir",
    "output_dir",
    "feeds_file",
    "records_file",
    "record_max",
    "cache_retention_days",
    "download_concurrency",
    "download_timeout_secs",
    "head_timeout_secs",
    "feed_timeout_secs",
    "from",
    "to",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Run configuration.
///
/// Every field has a default, so any subset of keys can be given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the resource cache.
    pub cache_dir: PathBuf,

    /// Where `.eml` files are written.
    pub output_dir: PathBuf,

    /// Feed list, one URL per line. A missing file is not an error.
    pub feeds_file: PathBuf,

    /// Dedup ledger file.
    pub records_file: PathBuf,

    /// Ledger records kept on persist.
    pub record_max: usize,

    /// Cache files older than this many days are purged after a run.
    pub cache_retention_days: u64,

    /// Maximum concurrent resource downloads.
    pub download_concurrency: usize,

    pub download_timeout_secs: u64,
    pub head_timeout_secs: u64,
    pub feed_timeout_secs: u64,

    /// `From` mailbox of generated messages.
    pub from: String,

    /// `To` mailbox. Falls back to `from`.
    pub to: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("."),
            feeds_file: PathBuf::from("feeds.txt"),
            records_file: PathBuf::from("records.txt"),
            record_max: DEFAULT_RECORD_MAX,
            cache_retention_days: 7,
            download_concurrency: DEFAULT_CONCURRENCY,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT.as_secs(),
            head_timeout_secs: DEFAULT_HEAD_TIMEOUT.as_secs(),
            feed_timeout_secs: 10,
            from: "feedmail@localhost".to_string(),
            to: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero concurrency, record limit or timeouts → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            output_dir = %config.output_dir.display(),
            cache_dir = %config.cache_dir.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values that would stall or disable a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "download_concurrency must be at least 1".to_string(),
            ));
        }
        if self.record_max == 0 {
            return Err(ConfigError::Invalid(
                "record_max must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            ("download_timeout_secs", self.download_timeout_secs),
            ("head_timeout_secs", self.head_timeout_secs),
            ("feed_timeout_secs", self.feed_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_days.saturating_mul(24 * 60 * 60))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedmail.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache_dir, PathBuf::from("temp"));
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.feeds_file, PathBuf::from("feeds.txt"));
        assert_eq!(config.records_file, PathBuf::from("records.txt"));
        assert_eq!(config.record_max, 2000);
        assert_eq!(config.download_concurrency, 5);
        assert_eq!(config.download_timeout(), Duration::from_secs(120));
        assert_eq!(config.head_timeout(), Duration::from_secs(10));
        assert_eq!(config.feed_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache_retention(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.from, "feedmail@localhost");
        assert!(config.to.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_file_returns_default() {
        let (_dir, path) = write_config("");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("output_dir = \"mail\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("mail"));
        assert_eq!(config.record_max, 2000);
        assert_eq!(config.cache_dir, PathBuf::from("temp"));
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
cache_dir = "/var/cache/feedmail"
output_dir = "out"
feeds_file = "list.txt"
records_file = "state/records.txt"
record_max = 50
cache_retention_days = 2
download_concurrency = 8
download_timeout_secs = 30
head_timeout_secs = 3
feed_timeout_secs = 15
from = "rss@example.com"
to = "me@example.com"
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config,
            Config {
                cache_dir: PathBuf::from("/var/cache/feedmail"),
                output_dir: PathBuf::from("out"),
                feeds_file: PathBuf::from("list.txt"),
                records_file: PathBuf::from("state/records.txt"),
                record_max: 50,
                cache_retention_days: 2,
                download_concurrency: 8,
                download_timeout_secs: 30,
                head_timeout_secs: 3,
                feed_timeout_secs: 15,
                from: "rss@example.com".to_string(),
                to: Some("me@example.com".to_string()),
            }
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("record_max = 10\ntotally_fake_key = \"x\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.record_max, 10);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("record_max = \"lots\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let (_dir, path) = write_config("download_concurrency = 0\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_record_max_rejected() {
        let (_dir, path) = write_config("record_max = 0\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("record_max"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (_dir, path) = write_config("head_timeout_secs = 0\n");
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("head_timeout_secs"));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_file_at_size_limit_accepted() {
        let mut content = "record_max = 5\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        let (_dir, path) = write_config(&content);
        assert!(Config::load(&path).is_ok());
    }
}

//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/binvault/config.toml)
//! 3. Environment variables (BINVAULT_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::eviction::DEFAULT_EVICTION_BATCH;
use crate::sync::{CoordinatorOptions, RetryPolicy};

/// Environment variable prefix
const ENV_PREFIX: &str = "BINVAULT";

const MIB: u64 = 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the small store and blob databases
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Small store quota in bytes
    #[serde(default = "default_small_store_quota")]
    pub small_store_quota_bytes: u64,

    /// Estimated blob store capacity in bytes
    #[serde(default = "default_blob_store_quota")]
    pub blob_store_quota_bytes: u64,

    /// Keys removed per eviction pass
    #[serde(default = "default_eviction_batch")]
    pub eviction_batch_size: usize,

    /// Remote service base URL (optional)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Whether the remote is used at all
    #[serde(default)]
    pub remote_enabled: bool,

    /// Per-request timeout; transport default when unset
    #[serde(default)]
    pub remote_timeout_secs: Option<u64>,

    /// Background probe interval; no background probing when unset
    #[serde(default)]
    pub probe_interval_secs: Option<u64>,

    /// Queue failed remote writes for replay
    #[serde(default)]
    pub outbox_enabled: bool,

    #[serde(default = "default_outbox_max_attempts")]
    pub outbox_max_attempts: u32,

    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Log filter used when BINVAULT_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            small_store_quota_bytes: default_small_store_quota(),
            blob_store_quota_bytes: default_blob_store_quota(),
            eviction_batch_size: default_eviction_batch(),
            remote_url: None,
            remote_enabled: false,
            remote_timeout_secs: None,
            probe_interval_secs: None,
            outbox_enabled: false,
            outbox_max_attempts: default_outbox_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (BINVAULT_DATA_DIR, BINVAULT_REMOTE_URL, ...)
    /// 2. Config file (~/.config/binvault/config.toml or BINVAULT_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the URL
        if let Ok(val) = std::env::var(format!("{}_REMOTE_URL", ENV_PREFIX)) {
            self.remote_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REMOTE_ENABLED", ENV_PREFIX)) {
            self.remote_enabled = parse_flag(&val);
        }

        if let Ok(val) = std::env::var(format!("{}_SMALL_STORE_QUOTA", ENV_PREFIX)) {
            match val.trim().parse() {
                Ok(quota) => self.small_store_quota_bytes = quota,
                Err(_) => tracing::warn!(
                    "Ignoring {}_SMALL_STORE_QUOTA={:?}: not a byte count",
                    ENV_PREFIX,
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_OUTBOX_ENABLED", ENV_PREFIX)) {
            self.outbox_enabled = parse_flag(&val);
        }

        if let Ok(val) = std::env::var(format!("{}_LOG", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to `path`
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with BINVAULT_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("binvault")
            .join("config.toml")
    }

    /// Path of the small store database
    pub fn small_store_path(&self) -> PathBuf {
        self.data_dir.join("smallstore.db")
    }

    /// Path of the blob database
    pub fn blob_store_path(&self) -> PathBuf {
        self.data_dir.join("blobs.db")
    }

    /// The remote URL, if the remote is enabled and configured
    pub fn active_remote_url(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .filter(|url| self.remote_enabled && !url.is_empty())
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_secs.map(Duration::from_secs)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        self.probe_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            outbox_enabled: self.outbox_enabled,
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
                max_attempts: self.outbox_max_attempts.max(1),
            },
        }
    }

    /// Set a field by its TOML name from a string value
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid value for {}: {:?}", key, value))
        }
        fn optional<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>> {
            if value.is_empty() || value == "none" {
                Ok(None)
            } else {
                parse(key, value).map(Some)
            }
        }

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "small_store_quota_bytes" => self.small_store_quota_bytes = parse(key, value)?,
            "blob_store_quota_bytes" => self.blob_store_quota_bytes = parse(key, value)?,
            "eviction_batch_size" => self.eviction_batch_size = parse(key, value)?,
            "remote_url" => self.remote_url = optional(key, value)?,
            "remote_enabled" => self.remote_enabled = parse_flag(value),
            "remote_timeout_secs" => self.remote_timeout_secs = optional(key, value)?,
            "probe_interval_secs" => self.probe_interval_secs = optional(key, value)?,
            "outbox_enabled" => self.outbox_enabled = parse_flag(value),
            "outbox_max_attempts" => self.outbox_max_attempts = parse(key, value)?,
            "initial_retry_delay_ms" => self.initial_retry_delay_ms = parse(key, value)?,
            "max_retry_delay_ms" => self.max_retry_delay_ms = parse(key, value)?,
            "log_level" => self.log_level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("binvault")
}

fn default_small_store_quota() -> u64 {
    5 * MIB
}

fn default_blob_store_quota() -> u64 {
    256 * MIB
}

fn default_eviction_batch() -> usize {
    DEFAULT_EVICTION_BATCH
}

fn default_outbox_max_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "BINVAULT_DATA_DIR",
        "BINVAULT_REMOTE_URL",
        "BINVAULT_REMOTE_ENABLED",
        "BINVAULT_SMALL_STORE_QUOTA",
        "BINVAULT_OUTBOX_ENABLED",
        "BINVAULT_LOG",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.remote_enabled);
        assert!(config.remote_url.is_none());
        assert!(!config.outbox_enabled);
        assert_eq!(config.small_store_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.eviction_batch_size, 3);
        assert!(config.data_dir.ends_with("binvault"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.small_store_path().ends_with("smallstore.db"));
        assert!(config.blob_store_path().ends_with("blobs.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BINVAULT_DATA_DIR", "/tmp/binvault-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/binvault-test"));
    }

    #[test]
    fn test_env_override_flags() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BINVAULT_REMOTE_ENABLED", "true");
        env::set_var("BINVAULT_OUTBOX_ENABLED", "1");
        config.apply_env_overrides();
        assert!(config.remote_enabled);
        assert!(config.outbox_enabled);

        env::set_var("BINVAULT_REMOTE_ENABLED", "false");
        config.apply_env_overrides();
        assert!(!config.remote_enabled);
    }

    #[test]
    fn test_env_override_remote_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BINVAULT_REMOTE_URL", "http://localhost:8080");
        config.apply_env_overrides();
        assert_eq!(config.remote_url.as_deref(), Some("http://localhost:8080"));

        // Empty string clears it
        env::set_var("BINVAULT_REMOTE_URL", "");
        config.apply_env_overrides();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_env_override_quota_ignores_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("BINVAULT_SMALL_STORE_QUOTA", "2048");
        config.apply_env_overrides();
        assert_eq!(config.small_store_quota_bytes, 2048);

        env::set_var("BINVAULT_SMALL_STORE_QUOTA", "lots");
        config.apply_env_overrides();
        assert_eq!(config.small_store_quota_bytes, 2048);
    }

    #[test]
    fn test_active_remote_requires_enabled_and_url() {
        let mut config = Config::default();
        assert!(config.active_remote_url().is_none());

        config.remote_url = Some("http://api".to_string());
        assert!(config.active_remote_url().is_none());

        config.remote_enabled = true;
        assert_eq!(config.active_remote_url(), Some("http://api"));
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            remote_url = "http://example.com"
            remote_enabled = true
            small_store_quota_bytes = 4096
            outbox_enabled = true
            outbox_max_attempts = 2
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.remote_url.as_deref(), Some("http://example.com"));
        assert!(config.remote_enabled);
        assert_eq!(config.small_store_quota_bytes, 4096);
        // Unset fields keep their defaults
        assert_eq!(config.blob_store_quota_bytes, 256 * 1024 * 1024);

        let options = config.coordinator_options();
        assert!(options.outbox_enabled);
        assert_eq!(options.retry.max_attempts, 2);
        assert_eq!(options.retry.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        env::set_var("BINVAULT_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap();
        assert!(!config.remote_enabled);
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };
        config.set_field("remote_url", "http://sync.example.com").unwrap();
        config.set_field("remote_enabled", "true").unwrap();
        config.set_field("probe_interval_secs", "30").unwrap();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.probe_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_set_field_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.set_field("eviction_batch_size", "many").is_err());
        assert!(config.set_field("favorite_color", "blue").is_err());

        config.set_field("remote_timeout_secs", "none").unwrap();
        assert!(config.remote_timeout().is_none());
    }
}

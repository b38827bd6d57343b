use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
}

/// Course plan backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the plan API (empty = offline demo backend)
    pub base_url: String,
    /// Sent as `X-CSRFToken` on every mutating request
    pub csrf_token: Option<String>,
    /// Raw `Cookie` header carrying the logged-in session
    pub session_cookie: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            csrf_token: None,
            session_cookie: None,
            request_timeout_secs: 10,
        }
    }
}

/// Reconciliation loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the pull/push loop at all
    pub enabled: bool,
    /// Delay between reconciliation cycles in milliseconds
    pub interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
        }
    }
}

/// Local persistent store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage file (empty = default data dir)
    pub path: Option<String>,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("courseplan-sync");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path).context("Failed to read config file")?;

            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// True when no backend is configured and the demo backend should be used
    pub fn is_offline(&self) -> bool {
        self.backend.base_url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.backend.base_url.is_empty());
        assert!(config.backend.csrf_token.is_none());
        assert_eq!(config.backend.request_timeout_secs, 10);
        assert!(config.sync.enabled);
        assert_eq!(config.sync.interval_ms, 2000);
        assert!(config.storage.path.is_none());
        assert!(config.is_offline());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[backend]
base_url = "https://penncourseplan.com/api/plan"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.backend.base_url, "https://penncourseplan.com/api/plan");
        assert!(!config.is_offline());
        assert_eq!(config.backend.request_timeout_secs, 10);
        assert_eq!(config.sync.interval_ms, 2000);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[backend]
base_url = "http://localhost:8000/api/plan"
csrf_token = "abc123"
session_cookie = "sessionid=xyz"
request_timeout_secs = 3

[sync]
enabled = false
interval_ms = 500

[storage]
path = "/tmp/plan.json"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.backend.csrf_token.as_deref(), Some("abc123"));
        assert_eq!(config.backend.session_cookie.as_deref(), Some("sessionid=xyz"));
        assert_eq!(config.backend.request_timeout_secs, 3);
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.interval_ms, 500);
        assert_eq!(config.storage.path.as_deref(), Some("/tmp/plan.json"));
    }

    #[test]
    fn test_serialized_default_is_valid() {
        let serialized = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Result<Config, _> = toml::from_str(&serialized);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result: Result<Config, _> = toml::from_str("this is not valid [[ toml");
        assert!(result.is_err());
    }
}

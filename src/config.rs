use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Goal;

/// Sync configuration. Sync stays disabled until a server URL is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "https://sync.example.com")
    pub server_url: Option<String>,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Minutes between periodic background flushes (default: 15)
    pub interval_minutes: Option<u64>,
    /// Mutations per sync batch (default: 50)
    pub batch_size: Option<usize>,
}

impl SyncConfig {
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes.unwrap_or(15)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(crate::sync::DEFAULT_BATCH_SIZE)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: PathBuf,
    /// Sync configuration
    pub sync: SyncConfig,
    /// Daily nutrient targets for goal tracking
    pub goal: Goal,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("nutrilog").join("nutrilog.db"),
            sync: SyncConfig::default(),
            goal: Goal::default(),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("NUTRILOG_DATABASE_PATH") {
            config.database_path = PathBuf::from(db_path);
        }
        if let Ok(server_url) = std::env::var("NUTRILOG_SERVER_URL") {
            config.sync.server_url = Some(server_url);
        }
        if let Ok(api_key) = std::env::var("NUTRILOG_API_KEY") {
            config.sync.api_key = Some(api_key);
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/nutrilog/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nutrilog")
            .join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

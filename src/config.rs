use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::sentinel::config::SentinelConfig;
use crate::sentinel::error::SentinelError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default)]
    pub rotation: LogRotation,
    /// PostgreSQL connection URL. Absent: in-memory stores (development only)
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub sentinel: SentinelConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "deposit-sentinel.log".to_string()
}

/// How often the log file rolls over
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, SentinelError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SentinelError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SentinelError> {
        let config: AppConfig = serde_yaml::from_str(content)
            .map_err(|e| SentinelError::Config(format!("Failed to parse config yaml: {}", e)))?;
        config.sentinel.validate()?;
        Ok(config)
    }
}

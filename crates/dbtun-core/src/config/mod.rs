//! Configuration management for dbtun

mod client;
pub mod serde_utils;
mod target;

pub use client::ClientConfig;
pub use target::{SshTunnelConfig, TargetConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level layout of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Local client settings
    pub client: ClientConfig,
    /// Named database targets
    pub targets: BTreeMap<String, TargetConfig>,
}

impl ConfigFile {
    /// A starter config with one direct and one tunneled target
    pub fn example() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(
            "local".to_string(),
            TargetConfig {
                host: "localhost".to_string(),
                database: Some("postgres".to_string()),
                require_tls: false,
                ..TargetConfig::default()
            },
        );
        targets.insert(
            "production".to_string(),
            TargetConfig {
                host: "db.internal".to_string(),
                user: Some("app".to_string()),
                password_env: Some("PRODUCTION_DB_PASSWORD".to_string()),
                database: Some("app".to_string()),
                tunnel: Some(SshTunnelConfig::new("bastion.example.com")),
                ..TargetConfig::default()
            },
        );

        Self {
            client: ClientConfig::default(),
            targets,
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dbtun")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

//! Target resolution
//!
//! Turns a target name into the connection parameters the client needs and
//! a decision on whether an SSH hop is required to reach the database.

use std::path::Path;

use crate::config::{self, ConfigFile, TargetConfig};
use crate::error::ConfigError;
use crate::types::{ConnectionParams, ResolvedTarget, TunnelRequirement};

/// Resolves a target identifier into connection parameters
pub trait ConfigResolver: Send + Sync {
    /// Resolve a named target
    fn resolve(&self, target: &str) -> Result<ResolvedTarget, ConfigError>;
}

/// Resolver backed by the `[targets]` table of a config file
#[derive(Debug, Clone)]
pub struct FileConfigResolver {
    config: ConfigFile,
}

impl FileConfigResolver {
    /// Create a resolver over an already-loaded config
    pub fn new(config: ConfigFile) -> Self {
        Self { config }
    }

    /// Load the config file at `path` and wrap it
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(config::load_config(path)?))
    }

    /// The underlying configuration
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    fn params_for(&self, name: &str, target: &TargetConfig) -> Result<ConnectionParams, ConfigError> {
        if target.host.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("targets.{}.host", name)));
        }
        if target.port == 0 {
            return Err(ConfigError::Invalid(format!(
                "targets.{}.port must be non-zero",
                name
            )));
        }

        let password = match (&target.password, &target.password_env) {
            (_, Some(var)) => Some(std::env::var(var).map_err(|_| {
                ConfigError::MissingField(format!(
                    "environment variable {} (targets.{}.password_env)",
                    var, name
                ))
            })?),
            (Some(literal), None) => Some(literal.clone()),
            (None, None) => None,
        };

        Ok(ConnectionParams {
            host: target.host.clone(),
            port: target.port,
            user: target.user.clone(),
            password,
            database: target.database.clone(),
            require_tls: target.require_tls,
        })
    }
}

impl ConfigResolver for FileConfigResolver {
    fn resolve(&self, name: &str) -> Result<ResolvedTarget, ConfigError> {
        let target = self
            .config
            .targets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;

        let params = self.params_for(name, target)?;
        let tunnel = match &target.tunnel {
            Some(ssh) => {
                if ssh.host.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "targets.{}.tunnel.host",
                        name
                    )));
                }
                TunnelRequirement::Ssh(ssh.clone())
            }
            None => TunnelRequirement::Direct,
        };

        tracing::debug!(
            target = name,
            host = %params.host,
            port = params.port,
            tunneled = tunnel.is_required(),
            "Resolved target"
        );

        Ok(ResolvedTarget {
            name: name.to_string(),
            params,
            tunnel,
        })
    }
}

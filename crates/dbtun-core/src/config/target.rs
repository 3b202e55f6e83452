//! Database target configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// A named database endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Database host (resolved on the bastion when tunneling)
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database user
    pub user: Option<String>,

    /// Literal password. Prefer `password_env`.
    pub password: Option<String>,

    /// Environment variable to read the password from
    pub password_env: Option<String>,

    /// Database name
    pub database: Option<String>,

    /// Require TLS between the client and the database
    pub require_tls: bool,

    /// SSH bastion to tunnel through, if the database is not directly reachable
    pub tunnel: Option<SshTunnelConfig>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            password_env: None,
            database: None,
            require_tls: true,
            tunnel: None,
        }
    }
}

/// SSH bastion settings for a tunneled target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    /// Bastion hostname
    pub host: String,

    /// Bastion SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Username for SSH authentication
    #[serde(default = "whoami::username")]
    pub user: String,

    /// Path to the private key for authentication
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    /// Expected bastion host key fingerprint. A mismatch rejects the connection.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,

    /// SSH handshake timeout
    #[serde(with = "duration_secs", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Local address the forwarding listener binds to (port 0 picks a free one)
    #[serde(default = "default_local_bind")]
    pub local_bind: String,
}

impl SshTunnelConfig {
    /// Bastion config with defaults for everything but the host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            user: whoami::username(),
            private_key_path: default_private_key_path(),
            host_key_fingerprint: None,
            connect_timeout: default_connect_timeout(),
            local_bind: default_local_bind(),
        }
    }

    /// `host:port` of the bastion
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_private_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ssh")
        .join("id_ed25519")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_local_bind() -> String {
    "127.0.0.1:0".to_string()
}

//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::config::SshTunnelConfig;

/// Environment variable carrying the database host
pub const ENV_HOST: &str = "PGHOST";
/// Environment variable carrying the database port
pub const ENV_PORT: &str = "PGPORT";
/// Environment variable carrying the database user
pub const ENV_USER: &str = "PGUSER";
/// Environment variable carrying the database password
pub const ENV_PASSWORD: &str = "PGPASSWORD";
/// Environment variable carrying the database name
pub const ENV_DATABASE: &str = "PGDATABASE";
/// Environment variable carrying the TLS mode
pub const ENV_SSLMODE: &str = "PGSSLMODE";

/// Connection parameters injected into the client process environment
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Database host as seen from the tunnel's far end (or directly)
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: Option<String>,
    /// Database password
    pub password: Option<String>,
    /// Database name
    pub database: Option<String>,
    /// Whether the client must negotiate TLS
    pub require_tls: bool,
}

impl ConnectionParams {
    /// Rewrite host and port so the client connects through a local endpoint
    pub fn via(&self, local: SocketAddr) -> Self {
        Self {
            host: local.ip().to_string(),
            port: local.port(),
            ..self.clone()
        }
    }

    /// Environment overlay for the client process
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (ENV_HOST.to_string(), self.host.clone()),
            (ENV_PORT.to_string(), self.port.to_string()),
        ];
        if let Some(user) = &self.user {
            env.push((ENV_USER.to_string(), user.clone()));
        }
        if let Some(password) = &self.password {
            env.push((ENV_PASSWORD.to_string(), password.clone()));
        }
        if let Some(database) = &self.database {
            env.push((ENV_DATABASE.to_string(), database.clone()));
        }
        let sslmode = if self.require_tls { "require" } else { "prefer" };
        env.push((ENV_SSLMODE.to_string(), sslmode.to_string()));
        env
    }
}

// Hand-written so passwords never end up in logs
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("require_tls", &self.require_tls)
            .finish()
    }
}

/// Whether a secure hop is needed to reach the database
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelRequirement {
    /// The database is reachable directly
    Direct,
    /// Traffic must go through an SSH bastion
    Ssh(SshTunnelConfig),
}

impl TunnelRequirement {
    /// Returns true if a real tunnel must be established
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Ssh(_))
    }
}

/// Output of the config resolver for one target
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// Target name as configured
    pub name: String,
    /// Where the database lives
    pub params: ConnectionParams,
    /// How to reach it
    pub tunnel: TunnelRequirement,
}

/// Signals the orchestrator can trap and forward to the client process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForwardedSignal {
    /// SIGINT (Ctrl+C)
    #[serde(rename = "INT")]
    Interrupt,
    /// SIGTERM
    #[serde(rename = "TERM")]
    Terminate,
    /// SIGHUP
    #[serde(rename = "HUP")]
    Hangup,
    /// SIGQUIT
    #[serde(rename = "QUIT")]
    Quit,
}

impl ForwardedSignal {
    /// Raw signal number for this platform
    #[cfg(unix)]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Hangup => libc::SIGHUP,
            Self::Quit => libc::SIGQUIT,
        }
    }

    /// Map a raw signal number back, if it is one we forward
    #[cfg(unix)]
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            libc::SIGINT => Some(Self::Interrupt),
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGHUP => Some(Self::Hangup),
            libc::SIGQUIT => Some(Self::Quit),
            _ => None,
        }
    }
}

impl fmt::Display for ForwardedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
        };
        write!(f, "{}", name)
    }
}

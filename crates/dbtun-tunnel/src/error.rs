//! Tunnel error types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Message shown for any failure of an established tunnel
pub const TUNNEL_FAILED_MESSAGE: &str = "Secure tunnel to your database failed";

/// Errors surfaced by tunnel handles
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Private key file could not be loaded
    #[error("Private key not found at {path}: {reason}")]
    KeyNotFound { path: PathBuf, reason: String },

    /// TCP connect or SSH handshake with the bastion failed
    #[error("Could not open secure tunnel to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Handshake did not finish within the configured timeout
    #[error("Timed out after {after:?} opening secure tunnel to {address}")]
    Timeout { address: String, after: Duration },

    /// Bastion host key did not match the configured fingerprint
    #[error("Host key verification failed for {address}: {message}")]
    HostKeyRejected { address: String, message: String },

    /// The bastion refused our key
    #[error("Authentication as '{user}' rejected by {address}")]
    AuthRejected { user: String, address: String },

    /// The local forwarding listener could not be bound
    #[error("Failed to bind local tunnel endpoint {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// An established tunnel failed. Transport detail is logged, not surfaced.
    #[error("Secure tunnel to your database failed")]
    Failed,

    /// An established tunnel was closed by the remote end
    #[error("Secure tunnel to your database was closed by the remote host")]
    ClosedByRemote,

    /// Tearing the tunnel down failed
    #[error("Failed to close secure tunnel: {0}")]
    Close(TransportError),
}

/// Low-level transport failure reported by a tunnel session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// Create a transport error from any displayable detail
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

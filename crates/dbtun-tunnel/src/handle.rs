//! Tunnel handles
//!
//! [`TunnelHandle`] has two variants with one contract:
//!
//! - `Direct`: no hop is required. `wait_for_close()` only resolves after
//!   `close()` is called, and closing touches no network resource.
//! - `Secure`: an established transport session. `wait_for_close()` resolves
//!   when the transport ends and `close()` disconnects it.
//!
//! `close()` is idempotent on both variants.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dbtun_core::{ConnectionParams, TunnelRequirement};

use crate::error::TunnelError;
use crate::session::TunnelSession;
use crate::ssh::SshSession;

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Direct connection, no tunnel involved
    NoTunnelNeeded,
    /// Handshake in progress
    ///
    /// Only reported in logs while [`TunnelHandle::connect`] runs. A handle
    /// exists once connecting has finished, so `state()` never returns it.
    Connecting,
    /// Tunnel is carrying traffic
    Open,
    /// Tunnel has been closed
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoTunnelNeeded => "no-tunnel-needed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Handle to an established, or intentionally absent, tunnel
pub enum TunnelHandle {
    /// Synthetic handle for targets reachable without a hop
    Direct(SyntheticTunnel),
    /// A real transport session
    Secure(SecureTunnel),
}

impl TunnelHandle {
    /// Open the tunnel a target requires
    ///
    /// Returns a `Direct` handle when no hop is needed. Otherwise connects
    /// to the bastion and starts forwarding a local port to `params`.
    pub async fn connect(
        params: &ConnectionParams,
        requirement: &TunnelRequirement,
    ) -> Result<Self, TunnelError> {
        match requirement {
            TunnelRequirement::Direct => {
                tracing::debug!("No tunnel required for {}:{}", params.host, params.port);
                Ok(Self::direct())
            }
            TunnelRequirement::Ssh(ssh) => {
                tracing::debug!(
                    state = %TunnelState::Connecting,
                    bastion = %ssh.address(),
                    "Opening secure tunnel to {}:{}",
                    params.host,
                    params.port
                );
                let session = SshSession::connect(ssh, &params.host, params.port).await?;
                Ok(Self::secure(Box::new(session), ssh.address()))
            }
        }
    }

    /// Create a synthetic handle
    pub fn direct() -> Self {
        Self::Direct(SyntheticTunnel::new())
    }

    /// Wrap an established transport session
    pub fn secure(session: Box<dyn TunnelSession>, remote: impl Into<String>) -> Self {
        let tunnel = SecureTunnel {
            session,
            remote: remote.into(),
            closed: AtomicBool::new(false),
        };
        tracing::info!(
            "Secure tunnel open via {} (local endpoint {})",
            tunnel.remote,
            tunnel.session.local_addr()
        );
        Self::Secure(tunnel)
    }

    /// Current state
    ///
    /// Starts at `NoTunnelNeeded` or `Open` and ends at `Closed`. Connecting
    /// happens before the handle exists.
    pub fn state(&self) -> TunnelState {
        match self {
            Self::Direct(t) if t.token.is_cancelled() => TunnelState::Closed,
            Self::Direct(_) => TunnelState::NoTunnelNeeded,
            Self::Secure(t) if t.closed.load(Ordering::Acquire) => TunnelState::Closed,
            Self::Secure(_) => TunnelState::Open,
        }
    }

    /// Address the client should connect to, if traffic is being forwarded
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        match self {
            Self::Direct(_) => None,
            Self::Secure(t) => Some(t.session.local_addr()),
        }
    }

    /// Suspend until the tunnel ends
    ///
    /// A transport failure is reported as [`TunnelError::Failed`]; the
    /// underlying detail is only logged.
    pub async fn wait_for_close(&self) -> Result<(), TunnelError> {
        match self {
            Self::Direct(t) => {
                t.token.cancelled().await;
                Ok(())
            }
            Self::Secure(t) => t.session.closed().await.map_err(|e| {
                tracing::debug!("Tunnel via {} failed: {}", t.remote, e);
                TunnelError::Failed
            }),
        }
    }

    /// Tear the tunnel down. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), TunnelError> {
        match self {
            Self::Direct(t) => {
                t.token.cancel();
                Ok(())
            }
            Self::Secure(t) => {
                if t.closed.swap(true, Ordering::AcqRel) {
                    return Ok(());
                }
                tracing::info!("Closing secure tunnel via {}", t.remote);
                t.session.disconnect().await.map_err(TunnelError::Close)
            }
        }
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("state", &self.state())
            .field("local_endpoint", &self.local_endpoint())
            .finish()
    }
}

/// Stand-in for a tunnel when the database is reachable directly
pub struct SyntheticTunnel {
    token: CancellationToken,
}

impl SyntheticTunnel {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }
}

/// A tunnel backed by a transport session
pub struct SecureTunnel {
    session: Box<dyn TunnelSession>,
    remote: String,
    closed: AtomicBool,
}

/// Opens tunnels for resolved targets
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Open whatever tunnel `requirement` calls for
    async fn connect(
        &self,
        params: &ConnectionParams,
        requirement: &TunnelRequirement,
    ) -> Result<TunnelHandle, TunnelError>;
}

/// Connector that opens real SSH tunnels
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl TunnelConnector for SshConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        requirement: &TunnelRequirement,
    ) -> Result<TunnelHandle, TunnelError> {
        TunnelHandle::connect(params, requirement).await
    }
}

//! SSH tunnel session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbtun_core::config::SshTunnelConfig;

use super::forward::{run_listener, ForwardTarget};
use super::handler::BastionHandler;
use super::TransportStatus;
use crate::error::{TransportError, TunnelError};
use crate::session::TunnelSession;

/// Keepalive interval so a silently dead bastion is noticed mid-session
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Missed keepalives before the session is considered dead
const KEEPALIVE_MAX: usize = 3;

/// An open SSH tunnel forwarding a loopback port to the database
pub struct SshSession {
    /// SSH session handle, shared with forwarding tasks
    handle: Arc<Handle<BastionHandler>>,
    /// Loopback address the listener is bound to
    local_addr: SocketAddr,
    /// Transport status published by the handler and the listener
    status: watch::Receiver<TransportStatus>,
    /// Set before a local disconnect so the handler reports `Closed`
    closing: Arc<AtomicBool>,
    /// Stops the listener and in-flight forwards
    shutdown: CancellationToken,
    /// Listener task
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl SshSession {
    /// Connect to the bastion and start forwarding to `db_host:db_port`
    pub async fn connect(
        config: &SshTunnelConfig,
        db_host: &str,
        db_port: u16,
    ) -> Result<Self, TunnelError> {
        let address = config.address();

        if !config.private_key_path.exists() {
            return Err(TunnelError::KeyNotFound {
                path: config.private_key_path.clone(),
                reason: "File does not exist".to_string(),
            });
        }
        let key = russh_keys::load_secret_key(&config.private_key_path, None).map_err(|e| {
            TunnelError::KeyNotFound {
                path: config.private_key_path.clone(),
                reason: format!("Failed to load key: {}", e),
            }
        })?;

        let (status_tx, status_rx) = watch::channel(TransportStatus::Open);
        let status_tx = Arc::new(status_tx);
        let closing = Arc::new(AtomicBool::new(false));
        let handler = BastionHandler::new(
            config.host_key_fingerprint.as_deref(),
            Arc::clone(&status_tx),
            Arc::clone(&closing),
        );

        let ssh_config = Arc::new(Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Config::default()
        });

        // One deadline covers TCP connect, key exchange and authentication
        let handle = tokio::time::timeout(
            config.connect_timeout,
            Self::handshake(config, ssh_config, handler, key, &closing),
        )
        .await
        .map_err(|_| {
            // The abandoned session is dropped; report it as a local close
            closing.store(true, Ordering::Release);
            TunnelError::Timeout {
                address: address.clone(),
                after: config.connect_timeout,
            }
        })??;

        let listener = match TcpListener::bind(&config.local_bind).await {
            Ok(listener) => listener,
            Err(source) => {
                closing.store(true, Ordering::Release);
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "local bind failed", "en")
                    .await;
                return Err(TunnelError::Bind {
                    address: config.local_bind.clone(),
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| TunnelError::Bind {
            address: config.local_bind.clone(),
            source,
        })?;

        let handle = Arc::new(handle);
        let shutdown = CancellationToken::new();
        let listener_task = tokio::spawn(run_listener(
            listener,
            Arc::clone(&handle),
            ForwardTarget {
                host: db_host.to_string(),
                port: db_port,
            },
            status_tx,
            shutdown.clone(),
        ));

        tracing::debug!(
            "Forwarding {} -> {}:{} via {}",
            local_addr,
            db_host,
            db_port,
            address
        );

        Ok(Self {
            handle,
            local_addr,
            status: status_rx,
            closing,
            shutdown,
            listener_task: Mutex::new(Some(listener_task)),
        })
    }

    /// Connect to the bastion and authenticate with `key`
    async fn handshake(
        config: &SshTunnelConfig,
        ssh_config: Arc<Config>,
        handler: BastionHandler,
        key: russh_keys::key::KeyPair,
        closing: &AtomicBool,
    ) -> Result<Handle<BastionHandler>, TunnelError> {
        let address = config.address();

        tracing::debug!("Connecting to bastion {}", address);
        let mut handle = client::connect(ssh_config, (config.host.as_str(), config.port), handler)
            .await
            .map_err(|e| {
                let err_str = e.to_string();
                // russh reports a rejected host key as "Unknown server key"
                if err_str.contains("Unknown server key") || err_str.contains("server key") {
                    return TunnelError::HostKeyRejected {
                        address: address.clone(),
                        message: "Bastion host key does not match host_key_fingerprint"
                            .to_string(),
                    };
                }
                TunnelError::Connect {
                    address: address.clone(),
                    reason: err_str,
                }
            })?;

        tracing::debug!("Authenticating to {} as '{}'", address, config.user);
        let authenticated = handle
            .authenticate_publickey(&config.user, Arc::new(key))
            .await
            .map_err(|e| TunnelError::Connect {
                address: address.clone(),
                reason: format!("Authentication error: {}", e),
            })?;
        if !authenticated {
            closing.store(true, Ordering::Release);
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication rejected", "en")
                .await;
            return Err(TunnelError::AuthRejected {
                user: config.user.clone(),
                address,
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl TunnelSession for SshSession {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn closed(&self) -> Result<(), TransportError> {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            match current {
                TransportStatus::Open => {}
                TransportStatus::Closed => return Ok(()),
                TransportStatus::Failed(detail) => return Err(TransportError::new(detail)),
            }
            if status.changed().await.is_err() {
                // Every publisher is gone without settling the status
                return if self.closing.load(Ordering::Acquire) {
                    Ok(())
                } else {
                    Err(TransportError::new("SSH session ended without a status"))
                };
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::Release);
        self.shutdown.cancel();

        let task = self
            .listener_task
            .lock()
            .map_err(|_| TransportError::new("listener task lock poisoned"))?
            .take();
        if let Some(task) = task {
            task.abort();
        }

        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| TransportError::new(format!("disconnect failed: {}", e)))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

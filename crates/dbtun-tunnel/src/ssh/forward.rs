//! Local port forwarding over `direct-tcpip` channels

use std::net::SocketAddr;
use std::sync::Arc;

use russh::client::Handle;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handler::BastionHandler;
use super::{settle, TransportStatus};

/// Where forwarded connections are sent, as seen from the bastion
#[derive(Debug, Clone)]
pub(super) struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

/// Accept local connections until `shutdown` fires or the listener fails
pub(super) async fn run_listener(
    listener: TcpListener,
    handle: Arc<Handle<BastionHandler>>,
    target: ForwardTarget,
    status: Arc<watch::Sender<TransportStatus>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Tunnel listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, origin)) => {
                    let handle = Arc::clone(&handle);
                    let target = target.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forward_connection(stream, origin, &handle, &target, shutdown).await {
                            tracing::warn!("Forwarded connection from {} failed: {:#}", origin, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::debug!("Tunnel listener accept error: {}", e);
                    settle(&status, TransportStatus::Failed(format!("local listener failed: {}", e)));
                    break;
                }
            }
        }
    }
}

/// Pipe one local connection through a new channel
async fn forward_connection(
    mut stream: TcpStream,
    origin: SocketAddr,
    handle: &Handle<BastionHandler>,
    target: &ForwardTarget,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();

    let channel = handle
        .channel_open_direct_tcpip(
            target.host.clone(),
            u32::from(target.port),
            origin.ip().to_string(),
            u32::from(origin.port()),
        )
        .await?;
    tracing::debug!(
        "Forwarding {} -> {}:{} via bastion",
        origin,
        target.host,
        target.port
    );

    let mut remote = channel.into_stream();
    let result = tokio::select! {
        copied = copy_bidirectional(&mut stream, &mut remote) => copied.map(|_| ()),
        _ = shutdown.cancelled() => Ok(()),
    };
    let _ = remote.shutdown().await;
    result?;
    Ok(())
}

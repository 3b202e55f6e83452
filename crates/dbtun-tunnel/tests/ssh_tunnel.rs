//! SSH tunnel integration tests
//!
//! Runs an in-process russh bastion that accepts any key and serves
//! `direct-tcpip` channels, plus a TCP echo server standing in for the
//! database.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::Channel;
use russh_keys::key::{KeyPair, PublicKey};
use tempfile::TempDir;
use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use dbtun_core::config::SshTunnelConfig;
use dbtun_core::{ConnectionParams, TunnelRequirement};
use dbtun_tunnel::{TunnelError, TunnelHandle, TunnelState};

/// Bastion-side handler: accept everyone, forward direct-tcpip channels
#[derive(Clone, Copy)]
struct TestBastion {
    /// Stall before answering public key authentication
    auth_delay: Duration,
}

#[async_trait]
impl Handler for TestBastion {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if !self.auth_delay.is_zero() {
            tokio::time::sleep(self.auth_delay).await;
        }
        Ok(Auth::Accept)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{}:{}", host_to_connect, port_to_connect);
        tokio::spawn(async move {
            if let Ok(mut upstream) = TcpStream::connect(target).await {
                let mut stream = channel.into_stream();
                let _ = copy_bidirectional(&mut stream, &mut upstream).await;
            }
        });
        Ok(true)
    }
}

/// Start the bastion, returning its address and host key fingerprint
async fn start_bastion() -> (SocketAddr, String) {
    start_bastion_with(TestBastion {
        auth_delay: Duration::ZERO,
    })
    .await
}

async fn start_bastion_with(bastion: TestBastion) -> (SocketAddr, String) {
    let host_key = KeyPair::generate_ed25519().expect("generate host key");
    let fingerprint = host_key
        .clone_public_key()
        .expect("public half of host key")
        .fingerprint();

    let mut config = russh::server::Config::default();
    config.keys.push(host_key);
    config.auth_rejection_time = Duration::from_millis(10);
    config.auth_rejection_time_initial = Some(Duration::from_secs(0));
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let _ = russh::server::run_stream(config, socket, bastion).await;
            });
        }
    });

    (addr, fingerprint)
}

/// Echo server standing in for the database
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// TCP proxy in front of the bastion; aborting the returned task drops the link
async fn start_proxy(upstream: SocketAddr) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        if let Ok((mut inbound, _)) = listener.accept().await {
            if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                let _ = copy_bidirectional(&mut inbound, &mut outbound).await;
            }
        }
    });
    (addr, task)
}

fn write_client_key(dir: &TempDir) -> PathBuf {
    let key = KeyPair::generate_ed25519().expect("generate client key");
    let path = dir.path().join("id_ed25519");
    let file = std::fs::File::create(&path).unwrap();
    russh_keys::encode_pkcs8_pem(&key, file).unwrap();
    path
}

fn tunnel_config(bastion: SocketAddr, key: PathBuf, fingerprint: Option<String>) -> SshTunnelConfig {
    let mut config = SshTunnelConfig::new(bastion.ip().to_string());
    config.port = bastion.port();
    config.user = "tester".to_string();
    config.private_key_path = key;
    config.host_key_fingerprint = fingerprint;
    config.connect_timeout = Duration::from_secs(5);
    config
}

fn db_params(addr: SocketAddr) -> ConnectionParams {
    ConnectionParams {
        host: addr.ip().to_string(),
        port: addr.port(),
        user: None,
        password: None,
        database: None,
        require_tls: false,
    }
}

#[tokio::test]
async fn test_traffic_flows_through_tunnel() {
    let dir = TempDir::new().unwrap();
    let (bastion, fingerprint) = start_bastion().await;
    let echo = start_echo().await;
    let config = tunnel_config(bastion, write_client_key(&dir), Some(fingerprint));

    let tunnel = TunnelHandle::connect(&db_params(echo), &TunnelRequirement::Ssh(config))
        .await
        .expect("tunnel should open");
    assert_eq!(tunnel.state(), TunnelState::Open);
    let local = tunnel.local_endpoint().expect("secure tunnel has a local endpoint");
    assert!(local.ip().is_loopback());

    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(b"SELECT 1").await.unwrap();
    let mut buf = [0u8; 8];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("echo through tunnel")
        .unwrap();
    assert_eq!(&buf, b"SELECT 1");

    tunnel.close().await.unwrap();
    tunnel.close().await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Closed);
    timeout(Duration::from_secs(5), tunnel.wait_for_close())
        .await
        .expect("closed tunnel resolves its wait")
        .unwrap();
}

#[tokio::test]
async fn test_dropped_link_fails_wait_with_generic_error() {
    let dir = TempDir::new().unwrap();
    let (bastion, _) = start_bastion().await;
    let (proxy, proxy_task) = start_proxy(bastion).await;
    let echo = start_echo().await;
    let config = tunnel_config(proxy, write_client_key(&dir), None);

    let tunnel = TunnelHandle::connect(&db_params(echo), &TunnelRequirement::Ssh(config))
        .await
        .expect("tunnel should open");

    proxy_task.abort();

    let err = timeout(Duration::from_secs(10), tunnel.wait_for_close())
        .await
        .expect("wait should resolve once the link drops")
        .unwrap_err();
    assert!(matches!(err, TunnelError::Failed));
    assert_eq!(err.to_string(), dbtun_tunnel::TUNNEL_FAILED_MESSAGE);

    // Closing after a failure is still safe
    tunnel.close().await.unwrap();
}

#[tokio::test]
async fn test_host_key_mismatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (bastion, _) = start_bastion().await;
    let echo = start_echo().await;
    let config = tunnel_config(
        bastion,
        write_client_key(&dir),
        Some("SHA256:not-the-right-fingerprint".to_string()),
    );

    let err = TunnelHandle::connect(&db_params(echo), &TunnelRequirement::Ssh(config))
        .await
        .unwrap_err();
    assert!(
        matches!(err, TunnelError::HostKeyRejected { .. }),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn test_missing_key_file() {
    let dir = TempDir::new().unwrap();
    let (bastion, _) = start_bastion().await;
    let config = tunnel_config(bastion, dir.path().join("does-not-exist"), None);

    let err = TunnelHandle::connect(
        &db_params("127.0.0.1:5432".parse().unwrap()),
        &TunnelRequirement::Ssh(config),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TunnelError::KeyNotFound { .. }));
}

#[tokio::test]
async fn test_unreachable_bastion() {
    let dir = TempDir::new().unwrap();
    // Bind then drop to get a port with nothing listening
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = tunnel_config(closed, write_client_key(&dir), None);

    let err = TunnelHandle::connect(
        &db_params("127.0.0.1:5432".parse().unwrap()),
        &TunnelRequirement::Ssh(config),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TunnelError::Connect { .. }), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_stalled_authentication_times_out() {
    let dir = TempDir::new().unwrap();
    let (bastion, _) = start_bastion_with(TestBastion {
        auth_delay: Duration::from_secs(20),
    })
    .await;
    let mut config = tunnel_config(bastion, write_client_key(&dir), None);
    config.connect_timeout = Duration::from_secs(1);

    let started = std::time::Instant::now();
    let err = timeout(
        Duration::from_secs(8),
        TunnelHandle::connect(
            &db_params("127.0.0.1:5432".parse().unwrap()),
            &TunnelRequirement::Ssh(config),
        ),
    )
    .await
    .expect("connect_timeout should bound authentication")
    .unwrap_err();

    assert!(matches!(err, TunnelError::Timeout { .. }), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

//! Orchestration tests
//!
//! Real `sh`/`sleep` children against a scripted in-memory tunnel session,
//! so every ordering of "client exits" and "tunnel closes" can be forced.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use dbtun_core::config::{ConfigFile, SshTunnelConfig};
use dbtun_core::{ConfigError, ConnectionParams, FileConfigResolver, ResolvedTarget, TunnelRequirement};
use dbtun_orchestrator::{ChildSpec, OrchestrationError, TunnelOrchestrator};
use dbtun_tunnel::{
    TransportError, TunnelConnector, TunnelError, TunnelHandle, TunnelSession,
    TUNNEL_FAILED_MESSAGE,
};

const LOCAL_ENDPOINT: &str = "127.0.0.1:15432";

/// How the scripted tunnel behaves once connected
#[derive(Clone)]
enum Script {
    /// No hop; synthetic handle
    Direct,
    /// Stays open until closed by us
    Open,
    /// Ends on its own after a delay
    EndsAfter(Duration, Result<(), TransportError>),
    /// Connecting fails
    Refused,
}

struct ScriptedConnector {
    script: Script,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn new(script: Script) -> Self {
        Self {
            script,
            connects: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TunnelConnector for ScriptedConnector {
    async fn connect(
        &self,
        _params: &ConnectionParams,
        _requirement: &TunnelRequirement,
    ) -> Result<TunnelHandle, TunnelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let ends_after = match &self.script {
            Script::Direct => return Ok(TunnelHandle::direct()),
            Script::Refused => {
                return Err(TunnelError::Connect {
                    address: "bastion:22".to_string(),
                    reason: "connection refused".to_string(),
                })
            }
            Script::Open => None,
            Script::EndsAfter(delay, outcome) => Some((*delay, outcome.clone())),
        };
        let session = ScriptedSession {
            ends_after,
            disconnected: CancellationToken::new(),
            disconnects: Arc::clone(&self.disconnects),
        };
        Ok(TunnelHandle::secure(Box::new(session), "bastion:22"))
    }
}

struct ScriptedSession {
    ends_after: Option<(Duration, Result<(), TransportError>)>,
    disconnected: CancellationToken,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl TunnelSession for ScriptedSession {
    fn local_addr(&self) -> SocketAddr {
        LOCAL_ENDPOINT.parse().unwrap()
    }

    async fn closed(&self) -> Result<(), TransportError> {
        match &self.ends_after {
            Some((delay, outcome)) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => outcome.clone(),
                    _ = self.disconnected.cancelled() => Ok(()),
                }
            }
            None => {
                self.disconnected.cancelled().await;
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.disconnected.cancel();
        Ok(())
    }
}

fn target() -> ResolvedTarget {
    ResolvedTarget {
        name: "analytics".to_string(),
        params: ConnectionParams {
            host: "db.internal".to_string(),
            port: 5432,
            user: Some("app".to_string()),
            password: None,
            database: Some("analytics".to_string()),
            require_tls: true,
        },
        tunnel: TunnelRequirement::Ssh(SshTunnelConfig::new("bastion")),
    }
}

fn sh(script: &str) -> ChildSpec {
    ChildSpec::new("sh").args(["-c", script])
}

fn process_exists(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid, 0) == 0 }
}

async fn read_pid(path: &Path) -> i32 {
    for _ in 0..200 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("child never wrote its pid");
}

#[tokio::test]
async fn test_child_first_cleans_up_exactly_once() {
    for _ in 0..100 {
        let connector = ScriptedConnector::new(Script::Open);
        let disconnects = Arc::clone(&connector.disconnects);
        let orchestrator = TunnelOrchestrator::new(connector);

        orchestrator.run(&target(), &sh("exit 0")).await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_tunnel_first_cleans_up_exactly_once() {
    for _ in 0..100 {
        let connector = ScriptedConnector::new(Script::EndsAfter(
            Duration::from_millis(1),
            Err(TransportError::new("connection reset")),
        ));
        let disconnects = Arc::clone(&connector.disconnects);
        let orchestrator = TunnelOrchestrator::new(connector);

        let err = orchestrator
            .run(&target(), &ChildSpec::new("sleep").args(["5"]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::TunnelFailed(TunnelError::Failed)));
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_tunnel_closing_early_returns_promptly() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::EndsAfter(
        Duration::from_millis(10),
        Err(TransportError::new("broken pipe")),
    )));

    let started = Instant::now();
    let err = orchestrator
        .run(&target(), &ChildSpec::new("sleep").args(["5"]))
        .await
        .unwrap_err();

    // Returning at all means the sleeping child was killed and reaped
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(err, OrchestrationError::TunnelFailed(_)));
}

#[tokio::test]
async fn test_tunnel_failure_kills_child() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("child.pid");
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::EndsAfter(
        Duration::from_millis(300),
        Err(TransportError::new("broken pipe")),
    )));

    let spec = sh(&format!("echo $$ > '{}'; exec sleep 5", pid_file.display()));
    let err = orchestrator.run(&target(), &spec).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::TunnelFailed(_)));

    let pid = read_pid(&pid_file).await;
    assert!(!process_exists(pid), "child {} survived the run", pid);
}

/// Alive and not a zombie waiting for its (killed) parent to be reaped
fn process_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Field after the parenthesised command name is the state
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) if Path::new("/proc/self").exists() => false,
        Err(_) => process_exists(pid),
    }
}

#[tokio::test]
async fn test_tunnel_failure_does_not_wait_for_grandchildren() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    // Late enough for the shell to record the grandchild's pid
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::EndsAfter(
        Duration::from_millis(200),
        Err(TransportError::new("broken pipe")),
    )));

    // The backgrounded sleep shares the client's stdout pipe
    let spec = sh(&format!("sleep 3 & echo $! > '{}'; wait", pid_file.display()));
    let started = Instant::now();
    let err = orchestrator.run(&target(), &spec).await.unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "run waited {:?} for a grandchild",
        started.elapsed()
    );
    assert!(matches!(err, OrchestrationError::TunnelFailed(_)));

    let pid = read_pid(&pid_file).await;
    for _ in 0..100 {
        if !process_running(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("grandchild {} survived the run", pid);
}

#[tokio::test]
async fn test_client_exit_does_not_wait_for_grandchildren() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::Open));

    let started = Instant::now();
    orchestrator
        .run(&target(), &sh("sleep 3 & exit 0"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_missing_client_is_child_not_found() {
    let connector = ScriptedConnector::new(Script::Open);
    let disconnects = Arc::clone(&connector.disconnects);
    let orchestrator = TunnelOrchestrator::new(connector);

    let err = orchestrator
        .run(&target(), &ChildSpec::new("dbtun-no-such-client"))
        .await
        .unwrap_err();

    match &err {
        OrchestrationError::ChildNotFound { program, help } => {
            assert_eq!(program, "dbtun-no-such-client");
            assert!(!help.is_empty());
        }
        other => panic!("expected ChildNotFound, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
    // The tunnel is still closed when spawning fails
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nonzero_exit_is_child_failed() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::Open));

    let err = orchestrator.run(&target(), &sh("exit 2")).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::ChildFailed { code: 2, .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_transport_error_is_generic_tunnel_failure() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::EndsAfter(
        Duration::from_millis(10),
        Err(TransportError::new("kex failure: connection reset by peer")),
    )));

    let err = orchestrator
        .run(&target(), &ChildSpec::new("sleep").args(["5"]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), TUNNEL_FAILED_MESSAGE);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_remote_close_is_tunnel_failure() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::EndsAfter(
        Duration::from_millis(10),
        Ok(()),
    )));

    let err = orchestrator
        .run(&target(), &ChildSpec::new("sleep").args(["5"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::TunnelFailed(TunnelError::ClosedByRemote)
    ));
}

#[tokio::test]
async fn test_signaled_child_is_signal_aborted() {
    let orchestrator = TunnelOrchestrator::new(ScriptedConnector::new(Script::Open));

    let err = orchestrator
        .run(&target(), &sh("kill -TERM $$"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::SignalAborted { signal, .. } if signal == libc::SIGTERM
    ));
    assert!(err.is_interruption());
    assert_eq!(err.exit_code(), 128 + libc::SIGTERM);
}

#[tokio::test]
async fn test_connect_failure_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("spawned");
    let connector = ScriptedConnector::new(Script::Refused);
    let connects = Arc::clone(&connector.connects);
    let orchestrator = TunnelOrchestrator::new(connector);

    let spec = sh(&format!("touch '{}'", marker.display()));
    let err = orchestrator.run(&target(), &spec).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestrationError::TunnelFailed(TunnelError::Connect { .. })
    ));
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_client_env_points_at_tunnel() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("env.txt");
    let spec = sh(&format!(
        "printf '%s:%s %s %s' \"$PGHOST\" \"$PGPORT\" \"$PGDATABASE\" \"$PGSSLMODE\" > '{}'",
        out.display()
    ));

    let tunneled = TunnelOrchestrator::new(ScriptedConnector::new(Script::Open));
    tunneled.run(&target(), &spec).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        format!("{} analytics require", LOCAL_ENDPOINT)
    );

    let direct = TunnelOrchestrator::new(ScriptedConnector::new(Script::Direct));
    direct.run(&target(), &spec).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "db.internal:5432 analytics require"
    );
}

#[tokio::test]
async fn test_run_target_unknown_name() {
    let resolver = FileConfigResolver::new(ConfigFile::default());
    let connector = ScriptedConnector::new(Script::Open);
    let connects = Arc::clone(&connector.connects);
    let orchestrator = TunnelOrchestrator::new(connector);

    let err = orchestrator
        .run_target(&resolver, "missing", &sh("exit 0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Config(ConfigError::UnknownTarget(_))
    ));
    assert_eq!(connects.load(Ordering::SeqCst), 0);
}

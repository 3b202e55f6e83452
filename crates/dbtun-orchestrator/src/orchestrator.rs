//! Tunnel orchestration
//!
//! One run opens the tunnel, launches the client against it, races the two,
//! and tears both down exactly once:
//!
//! ```text
//! resolve -> connect tunnel -> spawn client -> install forwarder
//!         -> select { client exits | tunnel closes }
//!         -> uninstall forwarder -> close tunnel -> kill + reap client
//! ```

use dbtun_core::{ConfigResolver, ForwardedSignal, ResolvedTarget};
use dbtun_tunnel::{SshConnector, TunnelConnector, TunnelError, TunnelHandle};

use crate::client::ClientLaunch;
use crate::error::{OrchestrationError, ProcessError};
use crate::process::{self, ChildHandle, ExitOutcome};
use crate::signal::SignalForwarder;

/// Whichever side finished first
enum RaceOutcome {
    Child(Result<ExitOutcome, ProcessError>),
    Tunnel(Result<(), TunnelError>),
}

/// Runs a client through a tunnel with guaranteed cleanup
///
/// Batch clients run in their own process group, and teardown kills the
/// whole group so nothing the client started keeps its output pipe open.
///
/// # Signals
///
/// Each run traps the configured signals (SIGINT by default) and forwards
/// them to the client. tokio cannot restore a signal's previous disposition,
/// so once a run has trapped a signal the host process keeps ignoring it
/// after the run returns: Ctrl+C no longer terminates a long-lived host on
/// its own. Hosts that need it should listen with `tokio::signal` themselves.
pub struct TunnelOrchestrator<C: TunnelConnector = SshConnector> {
    connector: C,
    forward_signals: Vec<ForwardedSignal>,
}

impl TunnelOrchestrator<SshConnector> {
    /// Orchestrator that opens real SSH tunnels
    pub fn ssh() -> Self {
        Self::new(SshConnector)
    }
}

impl Default for TunnelOrchestrator<SshConnector> {
    fn default() -> Self {
        Self::ssh()
    }
}

impl<C: TunnelConnector> TunnelOrchestrator<C> {
    /// Create an orchestrator that forwards SIGINT only
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            forward_signals: vec![ForwardedSignal::Interrupt],
        }
    }

    /// Replace the set of forwarded signals
    pub fn with_forwarded_signals(mut self, signals: Vec<ForwardedSignal>) -> Self {
        self.forward_signals = signals;
        self
    }

    /// Resolve `target` and run `client` against it
    pub async fn run_target(
        &self,
        resolver: &dyn ConfigResolver,
        target: &str,
        client: &dyn ClientLaunch,
    ) -> Result<(), OrchestrationError> {
        let resolved = resolver.resolve(target)?;
        self.run(&resolved, client).await
    }

    /// Run `client` against an already resolved target
    ///
    /// Both the tunnel and the client are released before this returns,
    /// whichever way the run ends.
    pub async fn run(
        &self,
        target: &ResolvedTarget,
        client: &dyn ClientLaunch,
    ) -> Result<(), OrchestrationError> {
        tracing::info!("Connecting to target '{}'", target.name);

        let tunnel = self
            .connector
            .connect(&target.params, &target.tunnel)
            .await
            .map_err(OrchestrationError::TunnelFailed)?;

        let params = match tunnel.local_endpoint() {
            Some(local) => target.params.via(local),
            None => target.params.clone(),
        };
        let spec = client.child_spec(params.to_env());

        let mut child = match process::spawn(&spec) {
            Ok(child) => child,
            Err(e) => {
                close_tunnel(&tunnel).await;
                return Err(e.into());
            }
        };

        let mut guard = match SignalForwarder::install(child.signaller(), &self.forward_signals) {
            Ok(guard) => guard,
            Err(e) => {
                close_tunnel(&tunnel).await;
                kill_and_reap(&mut child).await;
                return Err(e.into());
            }
        };

        // Client first so a simultaneous finish is attributed to the client
        let outcome = tokio::select! {
            biased;
            exit = child.wait_for_exit() => RaceOutcome::Child(exit),
            closed = tunnel.wait_for_close() => RaceOutcome::Tunnel(closed),
        };

        guard.uninstall();
        close_tunnel(&tunnel).await;
        kill_and_reap(&mut child).await;

        match outcome {
            RaceOutcome::Child(Ok(ExitOutcome::Code(0))) => {
                tracing::info!("{} finished successfully", client.program());
                Ok(())
            }
            RaceOutcome::Child(Ok(ExitOutcome::Code(code))) => Err(OrchestrationError::ChildFailed {
                program: client.program().to_string(),
                code,
            }),
            RaceOutcome::Child(Ok(ExitOutcome::Signaled(signal))) => {
                Err(OrchestrationError::SignalAborted {
                    program: client.program().to_string(),
                    signal,
                })
            }
            RaceOutcome::Child(Err(e)) => Err(e.into()),
            RaceOutcome::Tunnel(Ok(())) => {
                tracing::warn!("Tunnel closed while {} was running", client.program());
                Err(OrchestrationError::TunnelFailed(TunnelError::ClosedByRemote))
            }
            RaceOutcome::Tunnel(Err(e)) => Err(OrchestrationError::TunnelFailed(e)),
        }
    }
}

async fn close_tunnel(tunnel: &TunnelHandle) {
    if let Err(e) = tunnel.close().await {
        tracing::warn!("Failed to close tunnel: {}", e);
    }
}

async fn kill_and_reap(child: &mut ChildHandle) {
    if let Err(e) = child.kill(libc::SIGKILL) {
        tracing::warn!("Failed to kill {}: {}", child.program(), e);
    }
    if let Err(e) = child.kill_descendants(libc::SIGKILL) {
        tracing::warn!("Failed to kill processes left by {}: {}", child.program(), e);
    }
    if let Err(e) = child.reap().await {
        tracing::warn!("Failed to reap {}: {}", child.program(), e);
    }
}

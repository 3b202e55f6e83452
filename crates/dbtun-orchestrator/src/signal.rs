//! Signal forwarding to the client process
//!
//! While a client runs, lifecycle signals aimed at us (Ctrl+C from the
//! terminal, a supervisor's SIGTERM) are redirected to the child instead of
//! terminating the orchestrator mid-cleanup.
//!
//! Note: tokio keeps its process-wide handler registered for the life of the
//! process once a signal kind has been subscribed. After uninstall the
//! trapped signals are swallowed rather than restored to their default
//! action.

use std::future::poll_fn;
use std::task::Poll;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbtun_core::ForwardedSignal;

use crate::error::ProcessError;
use crate::process::ChildSignaller;

/// Installs signal forwarding
pub struct SignalForwarder;

impl SignalForwarder {
    /// Start forwarding `signals` to `target`
    ///
    /// Subscriptions are registered before this returns, so a signal raised
    /// right after `install` is already forwarded.
    pub fn install(
        target: ChildSignaller,
        signals: &[ForwardedSignal],
    ) -> Result<ForwarderGuard, ProcessError> {
        let mut trapped = Vec::with_capacity(signals.len());
        for &forwarded in signals {
            if trapped.iter().any(|t: &Trapped| t.signal == forwarded) {
                continue;
            }
            let stream = signal(SignalKind::from_raw(forwarded.as_raw()))
                .map_err(ProcessError::SignalHandler)?;
            trapped.push(Trapped {
                signal: forwarded,
                stream,
            });
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(forward_loop(trapped, target, token.clone()));
        tracing::debug!("Forwarding {:?} to the client", signals);

        Ok(ForwarderGuard {
            token,
            task: Some(task),
        })
    }
}

/// Keeps forwarding active; dropping it uninstalls
#[must_use = "forwarding stops when the guard is dropped"]
pub struct ForwarderGuard {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ForwarderGuard {
    /// Stop forwarding. Safe to call more than once.
    pub fn uninstall(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Signal forwarding uninstalled");
        }
    }

    /// Whether forwarding is still active
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for ForwarderGuard {
    fn drop(&mut self) {
        self.uninstall();
    }
}

struct Trapped {
    signal: ForwardedSignal,
    stream: Signal,
}

async fn forward_loop(mut trapped: Vec<Trapped>, target: ChildSignaller, token: CancellationToken) {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = next_signal(&mut trapped) => received,
        };
        if target.deliver(received.as_raw()) {
            tracing::debug!("Forwarded {} to the client", received);
        } else {
            tracing::debug!("Received {} but the client is no longer running", received);
        }
    }
}

async fn next_signal(trapped: &mut [Trapped]) -> ForwardedSignal {
    poll_fn(|cx| {
        for t in trapped.iter_mut() {
            if let Poll::Ready(Some(())) = t.stream.poll_recv(cx) {
                return Poll::Ready(t.signal);
            }
        }
        Poll::Pending
    })
    .await
}

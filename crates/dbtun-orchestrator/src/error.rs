//! Orchestration error types

use std::io;

use thiserror::Error;

use dbtun_core::{ConfigError, ForwardedSignal};
use dbtun_tunnel::TunnelError;

/// Conventional shell exit code base for signal termination (128 + signal)
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// Errors from spawning, waiting on, or signalling the client process
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The client executable could not be located
    #[error("'{program}' was not found on this machine.\n\n{help}")]
    NotFound { program: String, help: String },

    /// Spawning failed for another reason
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting for the process failed
    #[error("Failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Sending a signal failed
    #[error("Failed to send signal {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: io::Error,
    },

    /// Installing signal forwarding failed
    #[error("Failed to install signal forwarding: {0}")]
    SignalHandler(#[source] io::Error),
}

/// Outcome of one orchestration run, when it is not a success
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The target could not be resolved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The tunnel could not be opened, or failed while the client ran
    #[error("{0}")]
    TunnelFailed(#[source] TunnelError),

    /// The client executable is not installed
    #[error("'{program}' was not found on this machine.\n\n{help}")]
    ChildNotFound { program: String, help: String },

    /// The client ran and exited non-zero
    #[error("{program} exited with code {code}")]
    ChildFailed { program: String, code: i32 },

    /// The client was terminated by a signal
    #[error("{program} was terminated by {}", signal_name(.signal))]
    SignalAborted { program: String, signal: i32 },

    /// Any other process failure
    #[error(transparent)]
    Process(ProcessError),
}

impl OrchestrationError {
    /// Exit code the CLI should terminate with
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ChildFailed { code, .. } => *code,
            Self::SignalAborted { signal, .. } => EXIT_CODE_SIGNAL_BASE + signal,
            _ => 1,
        }
    }

    /// Whether this outcome was an intentional interruption rather than a failure
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::SignalAborted { .. })
    }
}

impl From<ProcessError> for OrchestrationError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound { program, help } => Self::ChildNotFound { program, help },
            other => Self::Process(other),
        }
    }
}

impl From<TunnelError> for OrchestrationError {
    fn from(err: TunnelError) -> Self {
        Self::TunnelFailed(err)
    }
}

fn signal_name(signal: &i32) -> String {
    ForwardedSignal::from_raw(*signal)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("signal {}", signal))
}

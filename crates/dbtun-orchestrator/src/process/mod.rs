//! Client process management
//!
//! Spawns the local client with an environment overlay and a stdio policy,
//! waits for it, and delivers signals only while it is still running.

mod install;

pub use install::install_instructions;

use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::ProcessError;

/// How long stdout may keep draining after the client has been reaped
const PUMP_GRACE: Duration = Duration::from_millis(500);

/// How the child's standard streams are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioPolicy {
    /// stdin closed, stdout pumped to our stdout, stderr inherited
    Batch,
    /// All three streams inherited from the terminal
    Interactive,
}

/// Everything needed to launch the client
#[derive(Debug, Clone)]
pub struct ChildSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments
    pub args: Vec<OsString>,
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Stream wiring
    pub stdio: StdioPolicy,
}

impl ChildSpec {
    /// New batch-mode spec with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdio: StdioPolicy::Batch,
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the stdio policy
    pub fn stdio(mut self, stdio: StdioPolicy) -> Self {
        self.stdio = stdio;
        self
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with a status code
    Code(i32),
    /// Terminated by a signal
    Signaled(i32),
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signaled(signal),
            // Neither is only possible for stopped/continued statuses, which wait() never yields
            (None, None) => Self::Code(-1),
        }
    }
}

/// Lifecycle state of the client process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Spec built, nothing spawned yet
    NotStarted,
    /// Process is running
    Running,
    /// Process ended on its own
    Exited(ExitOutcome),
    /// We force-killed the process
    Killed,
}

/// Owned handle to a spawned client process
///
/// Only the owner can send termination signals (`kill` takes `&mut self`).
/// Forwarded signals go through a [`ChildSignaller`].
pub struct ChildHandle {
    child: Child,
    program: String,
    pid: Option<u32>,
    state: ChildState,
    exited: Arc<AtomicBool>,
    /// Batch clients lead their own process group, so descendants can be killed
    group_leader: bool,
    stdout_pump: Option<JoinHandle<io::Result<u64>>>,
}

/// Spawn the client described by `spec`
///
/// A missing executable is reported as [`ProcessError::NotFound`] with
/// install instructions, distinct from every other spawn failure.
pub fn spawn(spec: &ChildSpec) -> Result<ChildHandle, ProcessError> {
    tracing::debug!(
        state = ?ChildState::NotStarted,
        "Spawning {} with {} argument(s), {} env override(s), {:?} stdio",
        spec.program,
        spec.args.len(),
        spec.env.len(),
        spec.stdio
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);

    // Interactive clients stay in our group so they keep the terminal
    match spec.stdio {
        StdioPolicy::Batch => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .process_group(0);
        }
        StdioPolicy::Interactive => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
    }

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ProcessError::NotFound {
                program: spec.program.clone(),
                help: install_instructions(&spec.program),
            }
        } else {
            ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            }
        }
    })?;

    let stdout_pump = child.stdout.take().map(|mut out| {
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            let copied = tokio::io::copy(&mut out, &mut stdout).await?;
            tokio::io::AsyncWriteExt::flush(&mut stdout).await?;
            Ok(copied)
        })
    });

    let pid = child.id();
    tracing::info!("Spawned {} (pid {:?})", spec.program, pid);

    Ok(ChildHandle {
        child,
        program: spec.program.clone(),
        pid,
        state: ChildState::Running,
        exited: Arc::new(AtomicBool::new(false)),
        group_leader: spec.stdio == StdioPolicy::Batch,
        stdout_pump,
    })
}

impl ChildHandle {
    /// Program this handle was spawned from
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current state
    pub fn state(&self) -> ChildState {
        self.state
    }

    /// A cloneable sender for forwarded signals
    pub fn signaller(&self) -> ChildSignaller {
        ChildSignaller {
            pid: self.pid,
            exited: Arc::clone(&self.exited),
        }
    }

    /// Suspend until the process terminates
    ///
    /// Cancel safe: dropping the future leaves the process running and the
    /// handle usable.
    pub async fn wait_for_exit(&mut self) -> Result<ExitOutcome, ProcessError> {
        if let ChildState::Exited(outcome) = self.state {
            return Ok(outcome);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| ProcessError::Wait {
                program: self.program.clone(),
                source,
            })?;
        Ok(self.record_exit(status))
    }

    /// Send `signal` if the process has not terminated yet
    ///
    /// Termination is checked with a non-blocking reap right before sending,
    /// so a recycled pid is never signalled. Returns whether a signal was
    /// delivered; calling it again after exit is a no-op.
    pub fn kill(&mut self, signal: i32) -> Result<bool, ProcessError> {
        if matches!(self.state, ChildState::Exited(_) | ChildState::Killed) {
            return Ok(false);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                return Ok(false);
            }
            Ok(None) => {}
            Err(source) => {
                return Err(ProcessError::Wait {
                    program: self.program.clone(),
                    source,
                })
            }
        }

        let Some(pid) = self.child.id() else {
            return Ok(false);
        };

        if !send_signal(pid, signal)? {
            return Ok(false);
        }
        if signal == libc::SIGKILL {
            self.state = ChildState::Killed;
        }
        tracing::debug!("Sent signal {} to {} (pid {})", signal, self.program, pid);
        Ok(true)
    }

    /// Send `signal` to whatever is left of the client's process group
    ///
    /// Reaches descendants (shell escapes, output pipelines) that outlive the
    /// client itself. Only batch clients get their own group; for interactive
    /// ones this is a no-op. Returns whether any process was signalled.
    pub fn kill_descendants(&mut self, signal: i32) -> Result<bool, ProcessError> {
        if !self.group_leader {
            return Ok(false);
        }
        let Some(pgid) = self.pid else {
            return Ok(false);
        };
        // A group id is not reused while any member is alive, so this
        // cannot reach an unrelated group
        let delivered = send_signal_to_group(pgid, signal)?;
        if delivered {
            tracing::debug!(
                "Sent signal {} to process group {} of {}",
                signal,
                pgid,
                self.program
            );
        }
        Ok(delivered)
    }

    /// Wait for the process, then give its stdout pump a short grace period
    ///
    /// A descendant that escaped the process group can hold the pipe open
    /// indefinitely; the pump is abandoned after [`PUMP_GRACE`].
    pub async fn reap(&mut self) -> Result<(), ProcessError> {
        self.wait_for_exit().await?;
        if let Some(mut pump) = self.stdout_pump.take() {
            match tokio::time::timeout(PUMP_GRACE, &mut pump).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::debug!("stdout pump for {} ended: {}", self.program, e)
                }
                Ok(Err(e)) => tracing::debug!("stdout pump for {} panicked: {}", self.program, e),
                Err(_) => {
                    tracing::warn!(
                        "Output of {} still open after exit, discarding the rest",
                        self.program
                    );
                    pump.abort();
                }
            }
        }
        Ok(())
    }

    fn record_exit(&mut self, status: ExitStatus) -> ExitOutcome {
        let outcome = ExitOutcome::from(status);
        self.exited.store(true, Ordering::Release);
        if self.state != ChildState::Killed {
            self.state = ChildState::Exited(outcome);
            tracing::info!("{} exited: {:?}", self.program, outcome);
        }
        outcome
    }
}

/// Delivers forwarded signals to a child while it is alive
#[derive(Debug, Clone)]
pub struct ChildSignaller {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

impl ChildSignaller {
    /// Forward `signal`. Returns whether it was delivered.
    pub fn deliver(&self, signal: i32) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return false;
        }
        let Some(pid) = self.pid else {
            return false;
        };
        match send_signal(pid, signal) {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }
}

/// `kill(2)` wrapper. `Ok(false)` when the process no longer exists.
fn send_signal(pid: u32, signal: i32) -> Result<bool, ProcessError> {
    // SAFETY: kill has no memory safety preconditions
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(true);
    }
    let source = io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(ProcessError::Signal {
        pid,
        signal,
        source,
    })
}

/// `kill(2)` on a whole process group. `Ok(false)` when the group is empty.
fn send_signal_to_group(pgid: u32, signal: i32) -> Result<bool, ProcessError> {
    // SAFETY: kill has no memory safety preconditions
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc == 0 {
        return Ok(true);
    }
    let source = io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(ProcessError::Signal {
        pid: pgid,
        signal,
        source,
    })
}

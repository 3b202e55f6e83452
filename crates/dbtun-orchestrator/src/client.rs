//! Database client invocation
//!
//! Builds the argument list and stdio policy for the local client. Connection
//! details travel in the environment; the only fixed argument is the
//! connection string that requires an encrypted transport.

use std::ffi::OsString;
use std::path::PathBuf;

use dbtun_core::config::ClientConfig;

use crate::process::{ChildSpec, StdioPolicy};

/// Connection-string argument passed on every invocation
pub const SSLMODE_ARG: &str = "sslmode=require";

/// What the client should do once connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMode {
    /// Run one statement and exit
    Statement(String),
    /// Run a script file and exit
    File(PathBuf),
    /// Interactive session on the terminal
    Interactive {
        prompt: Option<String>,
        history_file: Option<PathBuf>,
    },
}

impl ClientMode {
    /// Interactive mode using the configured prompt and history variable
    ///
    /// `prompt` overrides the configured prompt. The history file is read
    /// from the environment variable named by `config.history_env`.
    pub fn interactive(config: &ClientConfig, prompt: Option<String>) -> Self {
        let history_file = std::env::var_os(&config.history_env)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::Interactive {
            prompt: prompt.or_else(|| config.prompt.clone()),
            history_file,
        }
    }

    /// Stdio wiring for this mode
    pub fn stdio(&self) -> StdioPolicy {
        match self {
            Self::Interactive { .. } => StdioPolicy::Interactive,
            Self::Statement(_) | Self::File(_) => StdioPolicy::Batch,
        }
    }

    fn args(&self) -> Vec<OsString> {
        match self {
            Self::Statement(sql) => vec!["-c".into(), sql.into()],
            Self::File(path) => vec!["-f".into(), path.into()],
            Self::Interactive {
                prompt,
                history_file,
            } => {
                let mut args = Vec::new();
                if let Some(prompt) = prompt {
                    args.push(format!("--set=PROMPT1={}", prompt).into());
                }
                if let Some(path) = history_file {
                    let mut arg = OsString::from("--set=HISTFILE=");
                    arg.push(path);
                    args.push(arg);
                }
                args
            }
        }
    }
}

/// Something the orchestrator can launch against a connection environment
pub trait ClientLaunch: Send + Sync {
    /// Program name, for messages
    fn program(&self) -> &str;

    /// Build the process spec with `env` added to its environment
    fn child_spec(&self, env: Vec<(String, String)>) -> ChildSpec;
}

/// A database client invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    /// Executable
    pub program: String,
    /// What to run
    pub mode: ClientMode,
}

impl ClientCommand {
    /// Command for `program` in `mode`
    pub fn new(program: impl Into<String>, mode: ClientMode) -> Self {
        Self {
            program: program.into(),
            mode,
        }
    }

    /// Command for the configured client program
    pub fn from_config(config: &ClientConfig, mode: ClientMode) -> Self {
        Self::new(config.program.clone(), mode)
    }

    /// Full argument list
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(SSLMODE_ARG)];
        args.extend(self.mode.args());
        args
    }
}

impl ClientLaunch for ClientCommand {
    fn program(&self) -> &str {
        &self.program
    }

    fn child_spec(&self, env: Vec<(String, String)>) -> ChildSpec {
        ChildSpec {
            program: self.program.clone(),
            args: self.args(),
            env,
            stdio: self.mode.stdio(),
        }
    }
}

/// Launch an arbitrary spec, with the connection environment appended
impl ClientLaunch for ChildSpec {
    fn program(&self) -> &str {
        &self.program
    }

    fn child_spec(&self, env: Vec<(String, String)>) -> ChildSpec {
        let mut spec = self.clone();
        spec.env.extend(env);
        spec
    }
}

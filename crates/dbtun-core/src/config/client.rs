//! Local client process configuration

use serde::{Deserialize, Serialize};

use crate::types::ForwardedSignal;

/// Default environment variable consulted for the interactive history file
pub const DEFAULT_HISTORY_ENV: &str = "DBTUN_HISTFILE";

/// Settings for the local database client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client executable, looked up on `PATH` unless absolute
    pub program: String,

    /// Environment variable holding the interactive history file path
    pub history_env: String,

    /// Default interactive prompt
    pub prompt: Option<String>,

    /// Signals redirected to the client while it runs
    pub forward_signals: Vec<ForwardedSignal>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            program: "psql".to_string(),
            history_env: DEFAULT_HISTORY_ENV.to_string(),
            prompt: None,
            forward_signals: vec![ForwardedSignal::Interrupt],
        }
    }
}

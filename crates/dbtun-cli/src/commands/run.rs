//! Shell and exec commands
//!
//! Both resolve a target from the config file and hand the client to the
//! orchestrator; they differ only in the client mode.

use std::path::{Path, PathBuf};

use dbtun_core::config::ConfigFile;
use dbtun_core::{ConfigError, FileConfigResolver};
use dbtun_orchestrator::{ClientCommand, ClientMode, OrchestrationError, TunnelOrchestrator};

/// Open an interactive client session against `target`
pub async fn shell_command(
    config_path: &Path,
    target: &str,
    prompt: Option<String>,
) -> Result<(), OrchestrationError> {
    let resolver = FileConfigResolver::from_path(config_path)?;
    let mode = ClientMode::interactive(&resolver.config().client, prompt);
    run_client(&resolver, target, mode).await
}

/// Run a statement or script against `target` and exit
pub async fn exec_command(
    config_path: &Path,
    target: &str,
    command: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), OrchestrationError> {
    let resolver = FileConfigResolver::from_path(config_path)?;
    let mode = match (command, file) {
        (Some(sql), _) => ClientMode::Statement(sql),
        (None, Some(path)) => ClientMode::File(path),
        (None, None) => {
            return Err(
                ConfigError::Invalid("exec needs --command or --file".to_string()).into(),
            )
        }
    };
    run_client(&resolver, target, mode).await
}

async fn run_client(
    resolver: &FileConfigResolver,
    target: &str,
    mode: ClientMode,
) -> Result<(), OrchestrationError> {
    let config: &ConfigFile = resolver.config();
    let client = ClientCommand::from_config(&config.client, mode);
    let orchestrator =
        TunnelOrchestrator::ssh().with_forwarded_signals(config.client.forward_signals.clone());

    tracing::debug!("Running {} against '{}'", client.program, target);
    orchestrator.run_target(resolver, target, &client).await
}

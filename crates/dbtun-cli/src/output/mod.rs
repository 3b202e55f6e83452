//! Output formatting utilities for the CLI
//!
//! Tables for configured targets, colored status messages, and the
//! user-facing report for a failed run.

use tabled::{settings::Style, Table, Tabled};

use dbtun_core::config::ConfigFile;
use dbtun_orchestrator::OrchestrationError;

/// Format the configured targets as an ASCII table
///
/// Returns "No targets configured" if the table is empty.
pub fn format_targets(config: &ConfigFile) -> String {
    if config.targets.is_empty() {
        return "No targets configured".to_string();
    }

    #[derive(Tabled)]
    struct TargetRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "DATABASE")]
        database: String,
        #[tabled(rename = "TUNNEL VIA")]
        via: String,
    }

    let rows: Vec<TargetRow> = config
        .targets
        .iter()
        .map(|(name, t)| TargetRow {
            name: name.clone(),
            host: t.host.clone(),
            port: t.port,
            database: t.database.clone().unwrap_or_else(|| "-".to_string()),
            via: t
                .tunnel
                .as_ref()
                .map(|ssh| format!("{}@{}", ssh.user, ssh.address()))
                .unwrap_or_else(|| "direct".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Tell the user why a run failed
///
/// Interruptions print nothing. A failing client has already reported its
/// own error, so only its exit code is passed on.
pub fn report_failure(err: &OrchestrationError) {
    match err {
        OrchestrationError::SignalAborted { .. } => {
            tracing::debug!("{}", err);
        }
        OrchestrationError::ChildFailed { .. } => {
            tracing::info!("{}", err);
        }
        OrchestrationError::TunnelFailed(_) => {
            print_error(&err.to_string());
            print_info("Check your network connection and VPN, then try again.");
        }
        OrchestrationError::Config(dbtun_core::ConfigError::NotFound(_)) => {
            print_error(&err.to_string());
            print_info("Run 'dbtun config init' to create one");
        }
        _ => print_error(&err.to_string()),
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stderr so stdout carries only query results.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

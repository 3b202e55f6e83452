//! dbtun CLI
//!
//! Runs the PostgreSQL client against configured database targets, opening
//! an SSH tunnel through a bastion when the target needs one.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbtun::commands;
use dbtun::output::report_failure;
use dbtun_core::config;

#[derive(Parser)]
#[command(name = "dbtun")]
#[command(author, version, about = "Run psql through an SSH tunnel to your database")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "DBTUN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive psql session on a target
    Shell {
        /// Target name from the config file
        target: String,
        /// Prompt to show (overrides [client] prompt)
        #[arg(short, long)]
        prompt: Option<String>,
    },

    /// Run a statement or script file on a target
    Exec {
        /// Target name from the config file
        target: String,
        /// SQL statement to run
        #[arg(short = 'e', long, conflicts_with = "file", required_unless_present = "file")]
        command: Option<String>,
        /// SQL script to run
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List configured targets
    Targets,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // Logs go to stderr; stdout belongs to the client
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    let outcome = match cli.command {
        Commands::Shell { target, prompt } => {
            commands::shell_command(&config_path, &target, prompt).await
        }
        Commands::Exec {
            target,
            command,
            file,
        } => commands::exec_command(&config_path, &target, command, file).await,
        Commands::Targets => return commands::targets_command(&config_path),
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(&config_path),
                ConfigAction::Path => commands::config_path(&config_path),
                ConfigAction::Init { force } => commands::config_init(&config_path, force),
            }
        }
    };

    if let Err(e) = outcome {
        report_failure(&e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

//! CLI command implementations

mod config;
mod run;
mod targets;

pub use config::{config_init, config_path, config_show};
pub use run::{exec_command, shell_command};
pub use targets::targets_command;

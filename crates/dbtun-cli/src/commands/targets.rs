//! Targets command implementation

use std::path::Path;

use anyhow::{Context, Result};

use dbtun_core::config::{self, ConfigFile};

use crate::output::{format_targets, print_info, print_warning};

/// List the targets in the config file
pub fn targets_command(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        print_warning(&format!("No configuration file found at {:?}", config_path));
        print_info("Run 'dbtun config init' to create one");
        return Ok(());
    }

    let config: ConfigFile = config::load_config(config_path)
        .with_context(|| format!("Failed to load config file: {:?}", config_path))?;

    println!("{}", format_targets(&config));
    Ok(())
}

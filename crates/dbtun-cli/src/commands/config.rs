//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use dbtun_core::config::{self, ConfigFile};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Show current configuration
pub fn config_show(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        print_warning(&format!("No configuration file found at {:?}", config_path));
        print_info("Run 'dbtun config init' to create one");
        return Ok(());
    }

    // Parse first so a broken file is reported rather than echoed
    let _: ConfigFile = config::load_config(config_path)
        .with_context(|| format!("Invalid config file: {:?}", config_path))?;

    print_info(&format!("Configuration file: {:?}", config_path));
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
    println!("{}", content);

    Ok(())
}

/// Print the config file path
pub fn config_path(config_path: &Path) -> Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

/// Write a starter configuration
pub fn config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(config_path, &ConfigFile::example())
        .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

    print_success(&format!("Created configuration file: {:?}", config_path));
    print_info("Edit the [targets] entries, then run 'dbtun shell <TARGET>'");
    Ok(())
}

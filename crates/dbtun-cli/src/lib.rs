//! dbtun-cli: Command-line interface for dbtun
//!
//! Provides the `dbtun` binary: interactive and batch client sessions
//! through a tunnel, plus target listing and config management.

pub mod commands;
pub mod output;

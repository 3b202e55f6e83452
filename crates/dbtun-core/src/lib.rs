//! dbtun-core: Configuration and shared types for dbtun
//!
//! This crate provides the configuration file model, the resolver that turns
//! a target name into connection parameters plus a tunnel requirement, and the
//! error types shared by the tunnel, orchestrator, and CLI crates.

pub mod config;
pub mod error;
pub mod resolver;
pub mod types;

pub use error::ConfigError;
pub use resolver::{ConfigResolver, FileConfigResolver};
pub use types::{ConnectionParams, ForwardedSignal, ResolvedTarget, TunnelRequirement};

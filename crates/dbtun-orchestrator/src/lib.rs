//! dbtun-orchestrator: Run a database client through a secure tunnel
//!
//! [`TunnelOrchestrator`] opens the tunnel a target needs, launches the client
//! with its environment pointed at the tunnel, forwards terminal signals to
//! it, and races client exit against tunnel closure. Whichever finishes
//! first, the forwarder, the tunnel, and the client are released exactly once
//! before the run returns.

pub mod client;
mod error;
mod orchestrator;
pub mod process;
pub mod signal;

pub use client::{ClientCommand, ClientLaunch, ClientMode};
pub use error::{OrchestrationError, ProcessError};
pub use orchestrator::TunnelOrchestrator;
pub use process::{ChildHandle, ChildSignaller, ChildSpec, ChildState, ExitOutcome, StdioPolicy};
pub use signal::{ForwarderGuard, SignalForwarder};

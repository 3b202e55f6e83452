//! dbtun-tunnel: Secure tunnels to remote databases
//!
//! A [`TunnelHandle`] is either a real SSH tunnel, which forwards a local
//! loopback port to the database through a bastion, or a synthetic stand-in
//! for targets that need no hop. Both expose the same wait/close contract so
//! callers never special-case the direct path.

mod error;
mod handle;
mod session;
pub mod ssh;

pub use error::{TransportError, TunnelError, TUNNEL_FAILED_MESSAGE};
pub use handle::{SshConnector, TunnelConnector, TunnelHandle, TunnelState};
pub use session::TunnelSession;

//! SSH tunnel implementation
//!
//! Connects to a bastion with public key authentication, binds a loopback
//! listener, and forwards every accepted connection to the database through
//! a `direct-tcpip` channel.

mod forward;
mod handler;
mod session;

pub use session::SshSession;

/// Transport status shared between the session, its handler, and the forwarder
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportStatus {
    /// Session is up
    Open,
    /// Session ended after we asked it to
    Closed,
    /// Session or forwarder failed
    Failed(String),
}

/// Move `status` from `Open` to `next`. Earlier outcomes are never overwritten.
pub(crate) fn settle(status: &tokio::sync::watch::Sender<TransportStatus>, next: TransportStatus) {
    status.send_if_modified(|current| {
        if *current == TransportStatus::Open {
            *current = next;
            true
        } else {
            false
        }
    });
}

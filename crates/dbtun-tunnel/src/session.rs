//! Transport session abstraction

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::TransportError;

/// A live transport carrying forwarded database traffic
///
/// Implemented by the SSH session and by in-memory sessions in tests.
#[async_trait]
pub trait TunnelSession: Send + Sync {
    /// Local address clients should connect to
    fn local_addr(&self) -> SocketAddr;

    /// Resolves once the transport ends. `Ok` for an orderly close,
    /// `Err` for a transport failure.
    async fn closed(&self) -> Result<(), TransportError>;

    /// Tear the transport down
    async fn disconnect(&self) -> Result<(), TransportError>;
}

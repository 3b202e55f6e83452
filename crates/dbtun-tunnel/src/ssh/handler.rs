//! russh client handler for the bastion connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use tokio::sync::watch;

use super::{settle, TransportStatus};

/// Client-side handler owned by the russh session task
///
/// The session task drops its handler when the connection ends, so `Drop`
/// is where the end of the transport is reported.
pub(super) struct BastionHandler {
    /// Expected host key fingerprint, without the `SHA256:` prefix
    expected_host_key: Option<String>,
    /// Shared transport status
    status: Arc<watch::Sender<TransportStatus>>,
    /// Set once a local disconnect has been requested
    closing: Arc<AtomicBool>,
}

impl BastionHandler {
    pub(super) fn new(
        expected_host_key: Option<&str>,
        status: Arc<watch::Sender<TransportStatus>>,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self {
            expected_host_key: expected_host_key.map(normalize_fingerprint),
            status,
            closing,
        }
    }
}

/// Strip the optional `SHA256:` prefix OpenSSH prints
fn normalize_fingerprint(fingerprint: &str) -> String {
    let trimmed = fingerprint.trim();
    trimmed
        .strip_prefix("SHA256:")
        .unwrap_or(trimmed)
        .to_string()
}

#[async_trait]
impl client::Handler for BastionHandler {
    type Error = anyhow::Error;

    /// Verify the bastion's host key against the configured fingerprint
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Bastion host key: SHA256:{}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if *expected != fingerprint => {
                tracing::warn!(
                    "Bastion host key mismatch: expected SHA256:{}, got SHA256:{}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("Bastion host key verified against configured fingerprint");
                Ok(true)
            }
            None => {
                tracing::warn!(
                    "No host_key_fingerprint configured; accepting bastion key SHA256:{}",
                    fingerprint
                );
                Ok(true)
            }
        }
    }
}

impl Drop for BastionHandler {
    fn drop(&mut self) {
        let next = if self.closing.load(Ordering::Acquire) {
            TransportStatus::Closed
        } else {
            TransportStatus::Failed("SSH session to bastion ended unexpectedly".to_string())
        };
        settle(&self.status, next);
    }
}

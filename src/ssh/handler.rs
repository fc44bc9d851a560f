//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::{debug, warn};

/// SSH client handler for russh
///
/// Server keys are accepted unconditionally unless strict checking is on,
/// in which case the key must already be recorded in `~/.ssh/known_hosts`.
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
    port: u16,
    strict: bool,
}

impl SshHandler {
    /// Create a new SSH handler for one host
    pub fn new(host: impl Into<String>, port: u16, strict: bool) -> Self {
        Self {
            host: host.into(),
            port,
            strict,
        }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.strict {
            debug!("Accepting server key for {} without verification", self.host);
            return Ok(true);
        }

        let known = russh::keys::check_known_hosts(&self.host, self.port, server_public_key)?;
        if !known {
            warn!(
                "Server key for {}:{} not found in known_hosts",
                self.host, self.port
            );
        }
        Ok(known)
    }
}

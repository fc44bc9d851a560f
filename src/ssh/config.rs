//! SSH configuration types
//!
//! Connection parameters for one host with its credentials already resolved.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_SSH_PORT, CONNECTION_TIMEOUT_SECS};

/// Resolved login credentials
#[derive(Clone)]
pub enum Credentials {
    /// Private key file, optionally passphrase-protected
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },

    /// Login password
    Password(String),
}

impl Credentials {
    /// The login password, when password authentication is used
    pub fn password(&self) -> Option<&str> {
        match self {
            Credentials::Password(password) => Some(password),
            Credentials::Key { .. } => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Key { path, .. } => f.debug_struct("Key").field("path", path).finish(),
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    pub credentials: Credentials,

    /// Check the server key against `~/.ssh/known_hosts`
    pub strict_host_key_checking: bool,

    /// Deadline for TCP connect plus handshake
    pub connect_timeout: Duration,
}

impl SshConfig {
    /// Create a new SSH configuration with minimal required fields
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credentials,
            strict_host_key_checking: false,
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.strict_host_key_checking = strict;
        self
    }

    /// `host:port` for display and connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

//! SSH transport module
//!
//! This module provides the authenticated per-host session, remote command
//! execution, sudo wrapping, and shell quoting.

pub mod command;
pub mod config;
pub mod connection;
pub mod elevation;
pub mod handler;
pub mod sanitize;

// Re-exports
pub use command::{CommandChannel, CommandOutput};
pub use config::{Credentials, SshConfig};
pub use connection::SshChannel;
pub use elevation::{derive_escalation_secret, wrap_sudo_command, EscalationSecret};
pub use handler::SshHandler;
pub use sanitize::{escape_for_shell, shell_quote};

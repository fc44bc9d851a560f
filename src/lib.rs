//! SSH Baseline - Converge Linux hosts to a baseline of users over SSH
//!
//! This crate connects to each host in an inventory over SSH and makes sure a
//! list of baseline users exists there, each with the configured authorized
//! keys and, where requested, a validated passwordless sudo drop-in.
//!
//! # Features
//!
//! - Key or password login, with the login password reused for `sudo -S`
//! - Idempotent reconcilers for accounts, `authorized_keys` and sudo policy
//! - `visudo`-checked sudoers staging, removed again when validation fails
//! - Per-host and per-step failure isolation with a run report
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-baseline inventory.yml
//! ssh-baseline inventory.yml --host web1 --verbose
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod prompt;
pub mod reconcile;
pub mod ssh;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{Args, Config, HostConfig, Inventory, UserSpec};
pub use error::{BaselineError, ErrorKind, Result};
pub use executor::PrivilegedExecutor;
pub use orchestrator::{
    Connector, HostOrchestrator, HostReport, HostState, RunReport, RunSummary, SshConnector,
};
pub use prompt::{PasswordPrompt, TerminalPrompt};
pub use reconcile::{
    AccountReconciler, AuthorizedKeysReconciler, Reconciler, ResourceOutcome,
    SudoPolicyReconciler,
};
pub use ssh::{CommandChannel, CommandOutput, EscalationSecret, SshChannel, SshConfig};

//! Idempotent reconcilers for baseline host state
//!
//! Each reconciler converges one resource kind for one user. They share the
//! [`Reconciler`] shape so the orchestrator can sequence them uniformly.
//!
//! Expected conditions such as "account does not exist" are read from
//! command exit codes; errors are reserved for failed changes, failed
//! validation and transport problems.

pub mod account;
pub mod authorized_keys;
pub mod sudo;

use std::fmt;

use async_trait::async_trait;

use crate::config::UserSpec;
use crate::error::Result;
use crate::executor::PrivilegedExecutor;

pub use account::AccountReconciler;
pub use authorized_keys::AuthorizedKeysReconciler;
pub use sudo::SudoPolicyReconciler;

/// What a successful reconciliation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    /// The resource did not exist and was created
    Created,

    /// The resource existed and was modified
    Changed,

    /// The resource already matched
    Unchanged,

    /// Nothing was requested or allowed for this user
    Skipped { reason: String },
}

impl ResourceOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        ResourceOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceOutcome::Created => f.write_str("created"),
            ResourceOutcome::Changed => f.write_str("changed"),
            ResourceOutcome::Unchanged => f.write_str("unchanged"),
            ResourceOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

/// Converges one resource kind for one user
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short resource name used in reports
    fn resource(&self) -> &'static str;

    async fn ensure(&self, exec: &PrivilegedExecutor<'_>, user: &UserSpec)
        -> Result<ResourceOutcome>;
}

/// Account, authorized keys, sudo policy, in that order
pub fn default_reconcilers() -> Vec<Box<dyn Reconciler>> {
    vec![
        Box::new(AccountReconciler),
        Box::new(AuthorizedKeysReconciler),
        Box::new(SudoPolicyReconciler::default()),
    ]
}

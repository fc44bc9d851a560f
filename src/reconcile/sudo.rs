//! Passwordless sudo drop-in reconciliation
//!
//! The policy line is written to a staging file next to the drop-in, checked
//! with `visudo -cf`, and only then moved into place. sudo skips files whose
//! names contain a `.`, so the staged file is never live, and a file that
//! fails validation is deleted before the step returns.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Reconciler, ResourceOutcome};
use crate::config::UserSpec;
use crate::error::{BaselineError, Result};
use crate::executor::PrivilegedExecutor;
use crate::ssh::shell_quote;

/// Directory sudo includes drop-in policy files from
pub const SUDOERS_DROPIN_DIR: &str = "/etc/sudoers.d";

/// Grants `NOPASSWD:ALL` through a per-account drop-in file
#[derive(Debug, Clone)]
pub struct SudoPolicyReconciler {
    dropin_dir: String,
}

impl Default for SudoPolicyReconciler {
    fn default() -> Self {
        Self::new(SUDOERS_DROPIN_DIR)
    }
}

impl SudoPolicyReconciler {
    pub fn new(dropin_dir: impl Into<String>) -> Self {
        Self {
            dropin_dir: dropin_dir.into(),
        }
    }

    /// `<dir>/90-<account>-bootstrap`, stable across runs
    pub fn dropin_path(&self, account: &str) -> String {
        format!(
            "{}/90-{}-bootstrap",
            self.dropin_dir.trim_end_matches('/'),
            account
        )
    }

    async fn discard(&self, exec: &PrivilegedExecutor<'_>, path: &str) {
        if !exec
            .sudo_best_effort("remove sudoers drop-in", &format!("rm -f {}", shell_quote(path)))
            .await
        {
            error!("{} could not be removed", path);
        }
    }
}

/// The single policy line for `account`
pub fn policy_line(account: &str) -> String {
    format!("{} ALL=(ALL) NOPASSWD:ALL\n", account)
}

#[async_trait]
impl Reconciler for SudoPolicyReconciler {
    fn resource(&self) -> &'static str {
        "sudo"
    }

    async fn ensure(
        &self,
        exec: &PrivilegedExecutor<'_>,
        user: &UserSpec,
    ) -> Result<ResourceOutcome> {
        if !user.wants_nopasswd() {
            return Ok(ResourceOutcome::skipped("passwordless sudo not requested"));
        }

        info!("Ensuring passwordless sudo for {}", user.name);

        let path = self.dropin_path(&user.name);
        let staged = format!("{}.tmp", path);
        let line = policy_line(&user.name);

        let previous = exec.sudo(&format!("cat {}", shell_quote(&path))).await?;

        let write = exec
            .sudo_with_input(&format!("cat > {}", shell_quote(&staged)), line.as_bytes())
            .await;
        match write {
            Ok(output) if output.success() => {}
            Ok(output) => {
                error!("Failed to write sudoers file: {}", output.stderr.trim());
                self.discard(exec, &staged).await;
                return Err(BaselineError::command(
                    format!("write {}", staged),
                    output.exit_code,
                    &output.stderr,
                ));
            }
            Err(e) => {
                self.discard(exec, &staged).await;
                return Err(e);
            }
        }

        if let Err(e) = exec
            .sudo_checked("chmod sudoers drop-in", &format!("chmod 440 {}", shell_quote(&staged)))
            .await
        {
            error!("Could not set mode 440 on {}", staged);
            self.discard(exec, &staged).await;
            return Err(e);
        }

        let validation = exec.sudo(&format!("visudo -cf {}", shell_quote(&staged))).await;
        let failure = match validation {
            Ok(ref output) if output.success() => None,
            Ok(output) => Some(format!("{}{}", output.stdout, output.stderr).trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(detail) = failure {
            error!("visudo validation failed, removing {}: {}", staged, detail);
            self.discard(exec, &staged).await;
            return Err(BaselineError::validation(format!("{}: {}", path, detail)));
        }

        if let Err(e) = exec
            .sudo_checked(
                "install sudoers drop-in",
                &format!("mv -f {} {}", shell_quote(&staged), shell_quote(&path)),
            )
            .await
        {
            warn!("Could not move {} into place", staged);
            self.discard(exec, &staged).await;
            return Err(e);
        }

        info!("Sudoers entry valid and in place");

        Ok(if !previous.success() {
            ResourceOutcome::Created
        } else if previous.stdout == line {
            ResourceOutcome::Unchanged
        } else {
            ResourceOutcome::Changed
        })
    }
}

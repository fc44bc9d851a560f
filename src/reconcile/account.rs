//! Local account reconciliation

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Reconciler, ResourceOutcome};
use crate::config::UserSpec;
use crate::error::{BaselineError, Result};
use crate::executor::PrivilegedExecutor;
use crate::ssh::shell_quote;

/// Ensures the account exists, creating it when allowed
///
/// Existing accounts get a best-effort `usermod` to normalise home, shell
/// and supplementary groups; failures there are logged, never fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountReconciler;

#[async_trait]
impl Reconciler for AccountReconciler {
    fn resource(&self) -> &'static str {
        "account"
    }

    async fn ensure(
        &self,
        exec: &PrivilegedExecutor<'_>,
        user: &UserSpec,
    ) -> Result<ResourceOutcome> {
        let probe = exec
            .sudo(&format!("getent passwd {}", shell_quote(&user.name)))
            .await?;

        if !probe.success() {
            if !user.create_if_missing {
                warn!(
                    "User {} missing, but create_if_missing is false. Skipping create.",
                    user.name
                );
                return Ok(ResourceOutcome::skipped(
                    "account missing and create_if_missing is false",
                ));
            }

            info!("Creating user {}", user.name);
            let output = exec.sudo(&useradd_command(user)).await?;
            if !output.success() {
                return Err(BaselineError::command(
                    format!("useradd {}", user.name),
                    output.exit_code,
                    &output.stderr,
                ));
            }
            info!("User {} created", user.name);
            return Ok(ResourceOutcome::Created);
        }

        info!("User {} already exists", user.name);
        let home = user.home_dir();
        let home_or_shell_drifted = match parse_passwd_entry(&probe.stdout) {
            Some((current_home, current_shell)) => {
                current_home != home || current_shell != user.shell
            }
            None => true,
        };

        let normalised = exec
            .sudo_best_effort(
                "usermod (home/shell)",
                &format!(
                    "usermod -d {} -s {} {}",
                    shell_quote(&home),
                    shell_quote(&user.shell),
                    shell_quote(&user.name)
                ),
            )
            .await;
        let mut changed = home_or_shell_drifted && normalised;

        if !user.groups.is_empty() {
            let missing = missing_groups(exec, user).await;
            let appended = exec
                .sudo_best_effort(
                    "usermod (groups)",
                    &format!(
                        "usermod -a -G {} {}",
                        shell_quote(&user.groups.join(",")),
                        shell_quote(&user.name)
                    ),
                )
                .await;
            changed |= missing && appended;
        }

        Ok(if changed {
            ResourceOutcome::Changed
        } else {
            ResourceOutcome::Unchanged
        })
    }
}

/// Whether any configured supplementary group is not yet held
///
/// An unreadable group list counts as missing.
async fn missing_groups(exec: &PrivilegedExecutor<'_>, user: &UserSpec) -> bool {
    match exec.sudo(&format!("id -nG {}", shell_quote(&user.name))).await {
        Ok(output) if output.success() => {
            let current: Vec<&str> = output.stdout.split_whitespace().collect();
            user.groups.iter().any(|g| !current.contains(&g.as_str()))
        }
        _ => true,
    }
}

/// `useradd` with home and shell always, uid and groups only when given
fn useradd_command(user: &UserSpec) -> String {
    let mut cmd = format!(
        "useradd -m -d {} -s {}",
        shell_quote(&user.home_dir()),
        shell_quote(&user.shell)
    );
    if let Some(uid) = user.uid {
        cmd.push_str(&format!(" -u {}", uid));
    }
    if !user.groups.is_empty() {
        cmd.push_str(&format!(" -G {}", shell_quote(&user.groups.join(","))));
    }
    cmd.push(' ');
    cmd.push_str(&shell_quote(&user.name));
    cmd
}

/// Home and shell fields of a `getent passwd` line
fn parse_passwd_entry(line: &str) -> Option<(&str, &str)> {
    let fields: Vec<&str> = line.trim_end().split(':').collect();
    match fields.as_slice() {
        [_, _, _, _, _, home, shell] => Some((*home, *shell)),
        _ => None,
    }
}

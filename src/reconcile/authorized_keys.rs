//! `~/.ssh/authorized_keys` reconciliation

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Reconciler, ResourceOutcome};
use crate::config::{KeysMode, UserSpec};
use crate::error::{BaselineError, Result};
use crate::executor::PrivilegedExecutor;
use crate::ssh::shell_quote;

/// Appends `$1` to file `$2` unless an identical line is already there.
///
/// Matching is fixed-string and whole-line (`grep -qxF`). A missing final
/// newline is repaired first so the key lands on its own line.
const APPEND_SCRIPT: &str = "grep -qxF -- \"$1\" \"$2\" 2>/dev/null && exit 0\n\
if [ -s \"$2\" ] && [ -n \"$(tail -c 1 \"$2\")\" ]; then echo >> \"$2\"; fi\n\
printf '%s\\n' \"$1\" >> \"$2\" && echo appended";

/// Ensures the configured public keys are present in the user's
/// authorized_keys file, with `.ssh` at 700 and the file at 600, both owned
/// by the account.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizedKeysReconciler;

#[async_trait]
impl Reconciler for AuthorizedKeysReconciler {
    fn resource(&self) -> &'static str {
        "authorized_keys"
    }

    async fn ensure(
        &self,
        exec: &PrivilegedExecutor<'_>,
        user: &UserSpec,
    ) -> Result<ResourceOutcome> {
        let spec = match user.authorized_keys.as_ref() {
            Some(spec) if !spec.keys.is_empty() => spec,
            _ => return Ok(ResourceOutcome::skipped("no authorized keys configured")),
        };

        info!("Ensuring authorized_keys for {}", user.name);

        let ssh_dir = format!("{}/.ssh", user.home_dir().trim_end_matches('/'));
        let auth_file = format!("{}/authorized_keys", ssh_dir);
        let owner = format!("{}:", user.name);

        exec.sudo_best_effort("mkdir .ssh", &format!("mkdir -p {}", shell_quote(&ssh_dir)))
            .await;
        exec.sudo_best_effort(
            "chown .ssh",
            &format!("chown {} {}", shell_quote(&owner), shell_quote(&ssh_dir)),
        )
        .await;
        exec.sudo_best_effort("chmod .ssh", &format!("chmod 700 {}", shell_quote(&ssh_dir)))
            .await;

        let written = match spec.mode() {
            KeysMode::Replace => replace_keys(exec, &auth_file, &key_block(&spec.keys)).await,
            KeysMode::AppendIfAbsent => append_keys(exec, &auth_file, &spec.keys).await,
        };

        // Re-applied even when the write failed
        let permissions = apply_file_permissions(exec, &owner, &auth_file).await;

        let outcome = written?;
        permissions?;
        info!("authorized_keys for {} {}", user.name, outcome);
        Ok(outcome)
    }
}

/// Newline-joined keys in configured order, newline-terminated
pub fn key_block(keys: &[String]) -> String {
    let mut block = keys.join("\n");
    block.push('\n');
    block
}

/// Overwrite the file with exactly `block`
async fn replace_keys(
    exec: &PrivilegedExecutor<'_>,
    file: &str,
    block: &str,
) -> Result<ResourceOutcome> {
    let current = exec.sudo(&format!("cat {}", shell_quote(file))).await?;
    if current.success() && current.stdout == block {
        debug!("{} already matches", file);
        return Ok(ResourceOutcome::Unchanged);
    }

    let output = exec
        .sudo_with_input(&format!("cat > {}", shell_quote(file)), block.as_bytes())
        .await?;
    if !output.success() {
        return Err(BaselineError::command(
            format!("write {}", file),
            output.exit_code,
            &output.stderr,
        ));
    }

    Ok(if current.success() {
        ResourceOutcome::Changed
    } else {
        ResourceOutcome::Created
    })
}

/// Append each key that is not already present as an exact line
async fn append_keys(
    exec: &PrivilegedExecutor<'_>,
    file: &str,
    keys: &[String],
) -> Result<ResourceOutcome> {
    let mut appended = 0usize;
    let mut first_failure = None;

    for key in keys {
        let command = format!(
            "sh -c {} sh {} {}",
            shell_quote(APPEND_SCRIPT),
            shell_quote(key),
            shell_quote(file)
        );
        let output = exec.sudo(&command).await?;

        if !output.success() {
            first_failure.get_or_insert_with(|| {
                BaselineError::command(
                    format!("append key to {}", file),
                    output.exit_code,
                    &output.stderr,
                )
            });
        } else if output.stdout.lines().any(|l| l == "appended") {
            appended += 1;
        }
    }

    if let Some(e) = first_failure {
        return Err(e);
    }

    debug!("Appended {} of {} keys to {}", appended, keys.len(), file);
    Ok(if appended > 0 {
        ResourceOutcome::Changed
    } else {
        ResourceOutcome::Unchanged
    })
}

async fn apply_file_permissions(
    exec: &PrivilegedExecutor<'_>,
    owner: &str,
    file: &str,
) -> Result<()> {
    let chown = exec
        .sudo_checked(
            "chown authorized_keys",
            &format!("chown {} {}", shell_quote(owner), shell_quote(file)),
        )
        .await;
    let chmod = exec
        .sudo_checked(
            "chmod authorized_keys",
            &format!("chmod 600 {}", shell_quote(file)),
        )
        .await;
    chown?;
    chmod?;
    Ok(())
}

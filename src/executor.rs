//! Privileged command execution
//!
//! [`PrivilegedExecutor`] binds a [`CommandChannel`] to the escalation secret
//! derived for its host. Every privileged call passes that secret into the
//! sudo wrapper and the stdin payload; nothing else holds it.

use tracing::{debug, warn};

use crate::error::{BaselineError, Result};
use crate::ssh::elevation::{
    sudo_stdin, wrap_sudo_command, EscalationSecret, SUDO_PASSWORD_CHECK,
};
use crate::ssh::{CommandChannel, CommandOutput};

/// Runs commands on one host's channel, escalating when asked
pub struct PrivilegedExecutor<'a> {
    channel: &'a dyn CommandChannel,
    secret: Option<&'a EscalationSecret>,
}

impl<'a> PrivilegedExecutor<'a> {
    pub fn new(channel: &'a dyn CommandChannel, secret: Option<&'a EscalationSecret>) -> Self {
        Self { channel, secret }
    }

    /// Run a command, optionally through sudo
    ///
    /// A non-zero exit status is returned as a normal `CommandOutput`; only
    /// transport failures are errors.
    pub async fn run(&self, command: &str, privileged: bool) -> Result<CommandOutput> {
        self.run_with_input(command, privileged, None).await
    }

    /// Run a command with `input` written to its stdin
    pub async fn run_with_input(
        &self,
        command: &str,
        privileged: bool,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        if !privileged {
            debug!("exec: {}", command);
            return self.channel.exec(command, input).await;
        }

        debug!(
            "sudo exec ({}): {}",
            if self.secret.is_some() {
                "with secret"
            } else {
                "passwordless"
            },
            command
        );
        let wrapped = wrap_sudo_command(command, self.secret);
        let stdin = sudo_stdin(self.secret, input);
        self.channel.exec(&wrapped, stdin.as_deref()).await
    }

    /// Run a privileged command
    pub async fn sudo(&self, command: &str) -> Result<CommandOutput> {
        self.run(command, true).await
    }

    /// Run a privileged command with a stdin payload
    pub async fn sudo_with_input(&self, command: &str, input: &[u8]) -> Result<CommandOutput> {
        self.run_with_input(command, true, Some(input)).await
    }

    /// Run a privileged command, turning a non-zero exit into a `Command` error
    pub async fn sudo_checked(&self, action: &str, command: &str) -> Result<CommandOutput> {
        let output = self.sudo(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(BaselineError::command(action, output.exit_code, &output.stderr))
        }
    }

    /// Run a privileged command whose failure is logged and otherwise ignored
    ///
    /// Returns whether the command succeeded.
    pub async fn sudo_best_effort(&self, action: &str, command: &str) -> bool {
        match self.sudo(command).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(
                    "{} failed (exit {:?}): {}",
                    action,
                    output.exit_code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("{} failed: {}", action, e);
                false
            }
        }
    }
}

/// The secret to use on `channel`, or `None` when sudo there needs no password
///
/// `sudo -S` only reads the secret line when it prompts. On a root login or
/// under `NOPASSWD` it would not, and the line would reach the command's
/// stdin, so the secret is withheld on such hosts.
pub async fn required_secret<'s>(
    channel: &dyn CommandChannel,
    secret: Option<&'s EscalationSecret>,
) -> Option<&'s EscalationSecret> {
    let secret = secret?;
    match channel.exec(SUDO_PASSWORD_CHECK, None).await {
        Ok(output) if output.success() => {
            debug!("sudo needs no password, escalation secret not used");
            None
        }
        Ok(_) => Some(secret),
        Err(e) => {
            warn!("sudo password check failed: {}", e);
            Some(secret)
        }
    }
}

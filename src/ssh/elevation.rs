//! Privilege elevation for remote commands
//!
//! This module provides:
//! - [`EscalationSecret`], the sudo password derived once per host
//! - Wrapping commands with `sudo`
//! - Building the stdin payload that feeds the secret to `sudo -S`

use std::fmt;

use super::sanitize::escape_for_shell;

/// Password fed to `sudo -S` for every privileged command on one host.
///
/// Owned by the host's processing scope and lent to the executor; it is
/// never written to disk or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct EscalationSecret(String);

impl EscalationSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EscalationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EscalationSecret(<redacted>)")
    }
}

/// Picks the escalation secret for a host.
///
/// An explicit `sudo_password` wins; otherwise the SSH login password is
/// reused. Key-authenticated hosts without an explicit secret get `None`,
/// which means passwordless sudo (or a root login) is assumed.
///
/// # Examples
///
/// ```
/// use ssh_baseline::ssh::elevation::derive_escalation_secret;
///
/// assert!(derive_escalation_secret(None, None).is_none());
/// assert!(derive_escalation_secret(None, Some("login")).is_some());
/// ```
pub fn derive_escalation_secret(
    explicit: Option<&str>,
    login_password: Option<&str>,
) -> Option<EscalationSecret> {
    explicit.or(login_password).map(EscalationSecret::new)
}

/// Non-interactive check for whether sudo needs a password at all.
///
/// Run with stdin closed. Success means sudo will not prompt (root login,
/// `NOPASSWD`), so no secret may be written to stdin on that host.
pub const SUDO_PASSWORD_CHECK: &str = "sudo -n true";

/// Wraps a command for execution with sudo privileges.
///
/// With a secret, sudo reads it from stdin (`-S`) and prints no prompt
/// (`-p ''`). `-k` ignores any cached credentials so sudo always consumes the
/// secret line before the command sees stdin. Without a secret, a bare
/// `sudo` is used.
///
/// # Examples
///
/// ```
/// use ssh_baseline::ssh::elevation::{wrap_sudo_command, EscalationSecret};
///
/// let cmd = wrap_sudo_command("id -u 'alice'", None);
/// assert_eq!(cmd, "sudo sh -c 'id -u '\"'\"'alice'\"'\"''");
///
/// let secret = EscalationSecret::new("pw");
/// let cmd = wrap_sudo_command("true", Some(&secret));
/// assert_eq!(cmd, "sudo -k -S -p '' sh -c 'true'");
/// ```
pub fn wrap_sudo_command(command: &str, secret: Option<&EscalationSecret>) -> String {
    let escaped_command = escape_for_shell(command);

    match secret {
        None => format!("sudo sh -c '{}'", escaped_command),
        Some(_) => format!("sudo -k -S -p '' sh -c '{}'", escaped_command),
    }
}

/// Builds what gets written to a privileged command's stdin: the secret line
/// first (when known), then the command's own payload.
///
/// Only valid when sudo is known to prompt on this host; see
/// [`SUDO_PASSWORD_CHECK`].
pub fn sudo_stdin(secret: Option<&EscalationSecret>, payload: Option<&[u8]>) -> Option<Vec<u8>> {
    match (secret, payload) {
        (None, None) => None,
        (None, Some(payload)) => Some(payload.to_vec()),
        (Some(secret), payload) => {
            let mut buf = Vec::with_capacity(secret.expose().len() + 1);
            buf.extend_from_slice(secret.expose().as_bytes());
            buf.push(b'\n');
            if let Some(payload) = payload {
                buf.extend_from_slice(payload);
            }
            Some(buf)
        }
    }
}

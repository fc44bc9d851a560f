//! Interactive password entry

use dialoguer::Password;

use crate::error::{BaselineError, Result};

/// Asks the operator for an SSH login password
pub trait PasswordPrompt: Send + Sync {
    fn prompt_password(&self, user: &str, host: &str) -> Result<String>;
}

/// Terminal prompt with hidden input
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt_password(&self, user: &str, host: &str) -> Result<String> {
        Password::new()
            .with_prompt(format!("SSH password for {}@{}", user, host))
            .interact()
            .map_err(|e| BaselineError::Prompt(e.to_string()))
    }
}

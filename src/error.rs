//! Error types for ssh-baseline

use thiserror::Error;

/// Main error type for baseline reconciliation
#[derive(Debug, Error)]
pub enum BaselineError {
    /// SSH connection or handshake failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Credentials were rejected by the host
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid configuration document or host entry
    #[error("Configuration error: {0}")]
    Config(String),

    /// A remote command exited with a non-zero status
    #[error("{action} failed with exit status {status}: {stderr}")]
    Command {
        action: String,
        status: i64,
        stderr: String,
    },

    /// A written file failed syntax validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// SSH key loading or parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// Interactive prompt failed
    #[error("Prompt failed: {0}")]
    Prompt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using BaselineError
pub type Result<T> = std::result::Result<T, BaselineError>;

/// Coarse classification used in run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Authentication,
    Configuration,
    Command,
    Validation,
}

impl BaselineError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        BaselineError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        BaselineError::Authentication(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        BaselineError::Config(msg.into())
    }

    /// Create a validation error from a string
    pub fn validation(msg: impl Into<String>) -> Self {
        BaselineError::Validation(msg.into())
    }

    /// Create a command error for a failed remote step
    pub fn command(action: impl Into<String>, status: Option<u32>, stderr: &str) -> Self {
        BaselineError::Command {
            action: action.into(),
            status: status.map_or(-1, i64::from),
            stderr: stderr.trim().to_string(),
        }
    }

    /// Which scope of the error taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            BaselineError::Connection(_) | BaselineError::Io(_) => ErrorKind::Connection,
            BaselineError::Authentication(_)
            | BaselineError::SshKey(_)
            | BaselineError::Prompt(_) => ErrorKind::Authentication,
            BaselineError::Config(_) | BaselineError::Yaml(_) => ErrorKind::Configuration,
            BaselineError::Command { .. } => ErrorKind::Command,
            BaselineError::Validation(_) => ErrorKind::Validation,
        }
    }
}

//! Configuration and CLI argument parsing for ssh-baseline
//!
//! The baseline document is YAML with two top-level sequences, `hosts` and
//! `baseline_users`. Every configured user is reconciled on every host.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{BaselineError, Result};

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 15;

/// SSH port used when a host entry has none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Private key used for `key` auth when `ssh_key` is not set
pub const DEFAULT_SSH_KEY: &str = "~/.ssh/id_rsa";

/// Login shell used when a user entry has none
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// ssh-baseline CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-baseline")]
#[command(version)]
#[command(about = "Converge baseline Linux host state (accounts, SSH keys, sudo policy) over SSH")]
pub struct Args {
    /// Path to the YAML baseline document
    pub config: Option<PathBuf>,

    /// Connection establishment timeout in seconds
    #[arg(long, default_value_t = CONNECTION_TIMEOUT_SECS, env = "SSH_BASELINE_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Only process the named host (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    pub hosts: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parsed and validated run configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosts and users to reconcile
    pub inventory: Inventory,

    /// Deadline for establishing each SSH connection
    pub connect_timeout: Duration,
}

impl Config {
    /// Create Config from CLI Args, loading and validating the document
    pub fn from_args(args: Args) -> Result<Self> {
        let path = args
            .config
            .ok_or_else(|| BaselineError::config("Usage: ssh-baseline <config.yml>"))?;

        let mut inventory = Inventory::load(&path)?;

        if !args.hosts.is_empty() {
            inventory.hosts.retain(|h| args.hosts.contains(&h.name));
            if inventory.hosts.is_empty() {
                return Err(BaselineError::config(format!(
                    "No configured host matches --host {}",
                    args.hosts.join(", ")
                )));
            }
        }

        Ok(Config {
            inventory,
            connect_timeout: Duration::from_secs(args.connect_timeout),
        })
    }
}

/// The baseline document: hosts to contact and users to converge on each
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub baseline_users: Vec<UserSpec>,
}

impl Inventory {
    /// Read, parse and validate a baseline document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BaselineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a baseline document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut inventory: Inventory = serde_yaml::from_str(content)?;
        inventory.normalize();
        inventory.validate()?;
        Ok(inventory)
    }

    fn normalize(&mut self) {
        for host in &mut self.hosts {
            host.password = sanitize_password(host.password.take());
            host.sudo_password = sanitize_password(host.sudo_password.take());
            host.key_passphrase = sanitize_password(host.key_passphrase.take());
        }
        for key in self
            .baseline_users
            .iter_mut()
            .filter_map(|u| u.authorized_keys.as_mut())
            .flat_map(|ak| ak.keys.iter_mut())
        {
            *key = key.trim().to_string();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(BaselineError::config("No hosts configured"));
        }
        if self.baseline_users.is_empty() {
            return Err(BaselineError::config("No baseline_users configured"));
        }

        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for user in &self.baseline_users {
            if !seen.insert(user.name.as_str()) {
                errors.push(format!("Duplicate user '{}'", user.name));
            }
            if let Err(e) = validate_account_name(&user.name) {
                errors.push(e);
                continue;
            }
            if user.wants_nopasswd() && user.name.contains('.') {
                // sudo skips drop-in files whose names contain a dot
                errors.push(format!(
                    "User '{}': sudo drop-ins cannot be used for names containing '.'",
                    user.name
                ));
            }
            for group in &user.groups {
                if let Err(e) = validate_account_name(group) {
                    errors.push(format!("User '{}': group {}", user.name, e));
                }
            }
            if let Some(ref ak) = user.authorized_keys {
                for key in &ak.keys {
                    if let Err(e) = validate_public_key(key) {
                        errors.push(format!("User '{}': {}", user.name, e));
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(BaselineError::config(errors.join("\n")));
        }

        Ok(())
    }
}

/// One remote host entry
#[derive(Clone, Deserialize)]
pub struct HostConfig {
    /// Display name
    pub name: String,

    /// Network address
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    pub ssh_user: String,

    /// `key` or `password`; anything else fails that host only
    #[serde(default = "default_auth_method")]
    pub auth_method: String,

    /// Private key path for `key` auth
    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default)]
    pub key_passphrase: Option<String>,

    /// Login password for `password` auth; prompted for when absent
    #[serde(default)]
    pub password: Option<String>,

    /// Explicit escalation secret
    #[serde(default)]
    pub sudo_password: Option<String>,

    /// Require the server key to be present in `~/.ssh/known_hosts`
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl HostConfig {
    /// Create a key-authenticated host entry with defaults
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        ssh_user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port: DEFAULT_SSH_PORT,
            ssh_user: ssh_user.into(),
            auth_method: default_auth_method(),
            ssh_key: None,
            key_passphrase: None,
            password: None,
            sudo_password: None,
            strict_host_key_checking: false,
        }
    }

    /// Resolve the configured authentication variant
    pub fn auth_method(&self) -> Result<AuthMethod> {
        match self.auth_method.as_str() {
            "key" => Ok(AuthMethod::Key),
            "password" => Ok(AuthMethod::Password),
            other => Err(BaselineError::config(format!(
                "Unknown auth_method {} for host {}",
                other, self.hostname
            ))),
        }
    }

    /// Private key path with `~` and environment variables expanded
    pub fn key_path(&self) -> Result<PathBuf> {
        let raw = self.ssh_key.as_deref().unwrap_or(DEFAULT_SSH_KEY);
        let expanded = shellexpand::full(raw)
            .map_err(|e| BaselineError::config(format!("cannot expand ssh_key {raw}: {e}")))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("ssh_user", &self.ssh_user)
            .field("auth_method", &self.auth_method)
            .field("ssh_key", &self.ssh_key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "sudo_password",
                &self.sudo_password.as_ref().map(|_| "<redacted>"),
            )
            .finish_non_exhaustive()
    }
}

/// Supported SSH authentication variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Key,
    Password,
}

/// Desired state for one local account
#[derive(Debug, Clone, Deserialize)]
pub struct UserSpec {
    pub name: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub uid: Option<u32>,

    /// Supplementary groups
    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    #[serde(default)]
    pub authorized_keys: Option<AuthorizedKeysSpec>,

    #[serde(default)]
    pub sudo: Option<SudoSpec>,
}

impl UserSpec {
    /// Create a user spec with default shell and home
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shell: default_shell(),
            home: None,
            uid: None,
            groups: Vec::new(),
            create_if_missing: true,
            authorized_keys: None,
            sudo: None,
        }
    }

    /// Home directory, defaulting to `/home/<name>`
    pub fn home_dir(&self) -> String {
        self.home
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.name))
    }

    /// Whether passwordless sudo is requested
    pub fn wants_nopasswd(&self) -> bool {
        self.sudo.as_ref().is_some_and(|s| s.nopasswd)
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keys<I, S>(mut self, keys: I, mode: KeysMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorized_keys = Some(AuthorizedKeysSpec {
            keys: keys.into_iter().map(Into::into).collect(),
            replace: mode == KeysMode::Replace,
        });
        self
    }

    pub fn with_nopasswd(mut self) -> Self {
        self.sudo = Some(SudoSpec { nopasswd: true });
        self
    }
}

/// Desired authorized_keys content for a user
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedKeysSpec {
    /// Public key lines, in file order
    #[serde(default)]
    pub keys: Vec<String>,

    /// Overwrite the file instead of appending missing keys
    #[serde(default = "default_true")]
    pub replace: bool,
}

impl AuthorizedKeysSpec {
    pub fn mode(&self) -> KeysMode {
        if self.replace {
            KeysMode::Replace
        } else {
            KeysMode::AppendIfAbsent
        }
    }
}

/// How configured keys are merged into an existing authorized_keys file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysMode {
    Replace,
    AppendIfAbsent,
}

/// Desired sudo policy for a user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SudoSpec {
    #[serde(default)]
    pub nopasswd: bool,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_auth_method() -> String {
    "key".to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_true() -> bool {
    true
}

/// Check a user or group name against the portable account name rules
fn validate_account_name(name: &str) -> std::result::Result<(), String> {
    let body = name.strip_suffix('$').unwrap_or(name);
    let mut chars = body.chars();

    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    };

    if !valid || name.len() > 32 {
        return Err(format!("'{}' is not a valid account name", name));
    }
    Ok(())
}

/// Check that a configured key is one well-formed authorized_keys line
fn validate_public_key(line: &str) -> std::result::Result<(), String> {
    if line.contains('\n') || line.contains('\r') {
        return Err("authorized key must be a single line".to_string());
    }
    line.trim()
        .parse::<ssh_key::authorized_keys::Entry>()
        .map(|_| ())
        .map_err(|e| format!("invalid authorized key '{}': {}", abbreviate(line), e))
}

fn abbreviate(line: &str) -> String {
    if line.chars().count() > 24 {
        format!("{}...", line.chars().take(24).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Sanitize password: return None if empty
fn sanitize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}

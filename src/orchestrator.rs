//! Host orchestration
//!
//! Opens one session per host, derives that host's escalation secret, runs
//! every reconciler for every configured user, and closes the session.
//! Failures are contained at the narrowest scope: a reconciler error is
//! recorded for that step only, and a connection error skips only that host.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::{AuthMethod, HostConfig, Inventory, UserSpec};
use crate::error::{BaselineError, ErrorKind, Result};
use crate::executor::{required_secret, PrivilegedExecutor};
use crate::prompt::PasswordPrompt;
use crate::reconcile::{default_reconcilers, Reconciler, ResourceOutcome};
use crate::ssh::{
    derive_escalation_secret, CommandChannel, Credentials, EscalationSecret, SshChannel, SshConfig,
};

/// Opens the command channel for a host
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: CommandChannel + 'static;

    /// Connect and authenticate, returning the channel and the escalation
    /// secret to use on it
    async fn open(&self, host: &HostConfig) -> Result<(Self::Channel, Option<EscalationSecret>)>;
}

/// Connector backed by russh
pub struct SshConnector {
    connect_timeout: Duration,
    prompt: Arc<dyn PasswordPrompt>,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration, prompt: Arc<dyn PasswordPrompt>) -> Self {
        Self {
            connect_timeout,
            prompt,
        }
    }

    /// Resolve login credentials, prompting once if a password is needed
    async fn credentials(&self, host: &HostConfig) -> Result<Credentials> {
        match host.auth_method()? {
            AuthMethod::Key => Ok(Credentials::Key {
                path: host.key_path()?,
                passphrase: host.key_passphrase.clone(),
            }),
            AuthMethod::Password => {
                if let Some(ref password) = host.password {
                    return Ok(Credentials::Password(password.clone()));
                }
                let prompt = Arc::clone(&self.prompt);
                let user = host.ssh_user.clone();
                let address = host.hostname.clone();
                let password =
                    tokio::task::spawn_blocking(move || prompt.prompt_password(&user, &address))
                        .await
                        .map_err(|e| BaselineError::Prompt(e.to_string()))??;
                Ok(Credentials::Password(password))
            }
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Channel = SshChannel;

    async fn open(&self, host: &HostConfig) -> Result<(SshChannel, Option<EscalationSecret>)> {
        let credentials = self.credentials(host).await?;
        let secret = derive_escalation_secret(host.sudo_password.as_deref(), credentials.password());

        let config = SshConfig::new(&host.hostname, &host.ssh_user, credentials)
            .with_port(host.port)
            .with_connect_timeout(self.connect_timeout)
            .with_strict_host_key_checking(host.strict_host_key_checking);

        let channel = SshChannel::open(config).await?;
        Ok((channel, secret))
    }
}

/// Lifecycle of one host's processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Connecting,
    Connected,
    ProcessingUsers,
    Closed,
    /// Only reachable from `Connecting`
    Failed,
}

/// Result of one reconciler for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Done(ResourceOutcome),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub resource: &'static str,
    pub result: StepResult,
}

#[derive(Debug, Clone)]
pub struct UserReport {
    pub user: String,
    pub steps: Vec<StepReport>,
}

impl UserReport {
    pub fn step(&self, resource: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|s| s.resource == resource)
            .map(|s| &s.result)
    }
}

#[derive(Debug, Clone)]
pub struct HostReport {
    pub host: String,
    pub state: HostState,
    /// Why the host could not be processed
    pub error: Option<(ErrorKind, String)>,
    pub users: Vec<UserReport>,
}

impl HostReport {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            state: HostState::Connecting,
            error: None,
            users: Vec::new(),
        }
    }

    fn transition(&mut self, next: HostState) {
        debug!("{}: {:?} -> {:?}", self.host, self.state, next);
        self.state = next;
    }

    pub fn user(&self, name: &str) -> Option<&UserReport> {
        self.users.iter().find(|u| u.user == name)
    }
}

/// Everything that happened in one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub hosts: Vec<HostReport>,
}

impl RunReport {
    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for host in &self.hosts {
            if host.state == HostState::Failed {
                summary.hosts_failed += 1;
            }
            for step in host.users.iter().flat_map(|u| &u.steps) {
                match step.result {
                    StepResult::Done(ResourceOutcome::Created) => summary.created += 1,
                    StepResult::Done(ResourceOutcome::Changed) => summary.changed += 1,
                    StepResult::Done(ResourceOutcome::Unchanged) => summary.unchanged += 1,
                    StepResult::Done(ResourceOutcome::Skipped { .. }) => summary.skipped += 1,
                    StepResult::Failed { .. } => summary.failed += 1,
                }
            }
        }
        summary
    }
}

/// Step counts across a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub hosts_failed: usize,
    pub created: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} changed, {} unchanged, {} skipped, {} failed steps; {} unreachable hosts",
            self.created, self.changed, self.unchanged, self.skipped, self.failed, self.hosts_failed
        )
    }
}

/// Drives the reconcilers across hosts and users
pub struct HostOrchestrator<C: Connector> {
    connector: C,
    reconcilers: Vec<Box<dyn Reconciler>>,
}

impl<C: Connector> HostOrchestrator<C> {
    /// Orchestrator with the account, authorized_keys and sudo reconcilers
    pub fn new(connector: C) -> Self {
        Self::with_reconcilers(connector, default_reconcilers())
    }

    pub fn with_reconcilers(connector: C, reconcilers: Vec<Box<dyn Reconciler>>) -> Self {
        Self {
            connector,
            reconcilers,
        }
    }

    /// Process every host in order
    pub async fn run(&self, inventory: &Inventory) -> RunReport {
        let mut report = RunReport::default();
        for host in &inventory.hosts {
            let span = info_span!("host", name = %host.name);
            let host_report = self
                .process_host(host, &inventory.baseline_users)
                .instrument(span)
                .await;
            report.hosts.push(host_report);
        }
        report
    }

    /// Connect to one host and reconcile every user on it
    ///
    /// Once opened, the channel is closed before this returns. If a panic
    /// unwinds through here instead, dropping the channel tears the session
    /// down.
    pub async fn process_host(&self, host: &HostConfig, users: &[UserSpec]) -> HostReport {
        info!("=== {} ({}) ===", host.name, host.hostname);
        let mut report = HostReport::new(&host.name);

        let (channel, secret) = match self.connector.open(host).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to connect: {}", e);
                report.error = Some((e.kind(), e.to_string()));
                report.transition(HostState::Failed);
                return report;
            }
        };
        report.transition(HostState::Connected);

        report.transition(HostState::ProcessingUsers);
        {
            let secret = required_secret(&channel, secret.as_ref()).await;
            let exec = PrivilegedExecutor::new(&channel, secret);
            for user in users {
                let span = info_span!("user", name = %user.name);
                let user_report = self.process_user(&exec, user).instrument(span).await;
                report.users.push(user_report);
            }
        }

        channel.close().await;
        drop(secret);
        report.transition(HostState::Closed);
        report
    }

    async fn process_user(&self, exec: &PrivilegedExecutor<'_>, user: &UserSpec) -> UserReport {
        info!("Handling user {}", user.name);
        let mut steps = Vec::with_capacity(self.reconcilers.len());

        for reconciler in &self.reconcilers {
            let result = match reconciler.ensure(exec, user).await {
                Ok(outcome) => {
                    debug!("{} {}", reconciler.resource(), outcome);
                    StepResult::Done(outcome)
                }
                Err(e) => {
                    error!("{} for {} failed: {}", reconciler.resource(), user.name, e);
                    StepResult::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                }
            };
            steps.push(StepReport {
                resource: reconciler.resource(),
                result,
            });
        }

        UserReport {
            user: user.name.clone(),
            steps,
        }
    }
}

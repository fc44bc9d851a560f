//! SSH Baseline - Entry point
//!
//! Parses CLI arguments, loads and validates the inventory, then reconciles
//! every selected host in turn. Per-host failures are reported in the log and
//! do not change the exit status; only configuration errors do.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ssh_baseline::config::{Args, Config};
use ssh_baseline::orchestrator::{HostOrchestrator, HostState, SshConnector};
use ssh_baseline::prompt::TerminalPrompt;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; RUST_LOG overrides the default level
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("SSH Baseline v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "{} host(s), {} baseline user(s), connect timeout {}s",
        config.inventory.hosts.len(),
        config.inventory.baseline_users.len(),
        config.connect_timeout.as_secs()
    );

    let connector = SshConnector::new(config.connect_timeout, Arc::new(TerminalPrompt));
    let orchestrator = HostOrchestrator::new(connector);
    let report = orchestrator.run(&config.inventory).await;

    for host in report
        .hosts
        .iter()
        .filter(|h| h.state == HostState::Failed)
    {
        if let Some((kind, message)) = &host.error {
            warn!("{} skipped ({:?}): {}", host.host, kind, message);
        }
    }
    info!("Done: {}", report.summary());

    ExitCode::SUCCESS
}

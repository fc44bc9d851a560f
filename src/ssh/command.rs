//! Command execution over SSH
//!
//! Provides the `CommandOutput` struct, the `CommandChannel` trait that the
//! executor talks to, and its implementation for [`SshChannel`].

use async_trait::async_trait;
use russh::ChannelMsg;
use tracing::{debug, warn};

use super::connection::SshChannel;
use crate::error::{BaselineError, Result};

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command; `None` if the process ended without one
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of a process that exited with `code`
    pub fn with_status(code: u32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Check if the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A remote command execution session bound to one host
///
/// `exec` runs `command` to completion. When `input` is given it is written to
/// the command's stdin; stdin is closed for writing afterwards either way.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn exec(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput>;

    /// Release the session
    async fn close(&self);
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn exec(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        let channel = self.open_channel().await?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| BaselineError::connection(format!("Failed to exec command: {}", e)))?;

        if let Some(bytes) = input {
            channel
                .data(bytes)
                .await
                .map_err(|e| BaselineError::connection(format!("Failed to write stdin: {}", e)))?;
        }

        channel
            .eof()
            .await
            .map_err(|e| BaselineError::connection(format!("Failed to close stdin: {}", e)))?;

        Ok(collect_channel_output(channel).await)
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

/// Collect output from a channel until it closes
async fn collect_channel_output(mut channel: russh::Channel<russh::client::Msg>) -> CommandOutput {
    let mut output = CommandOutput::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                output.stdout.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    output.stderr.push_str(&String::from_utf8_lossy(&data));
                } else {
                    output.stdout.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_code = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                warn!("Remote command terminated by signal {:?}", signal_name);
            }
            // Exit status may still follow EOF
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    debug!(
        "Command completed: exit_code={:?}, stdout_len={}, stderr_len={}",
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );

    output
}

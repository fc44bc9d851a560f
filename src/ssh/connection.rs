//! SSH session for one host
//!
//! Opens an authenticated russh session with a bounded connection timeout.
//! Each remote command gets its own exec channel on this session (see
//! `command.rs`); the session is closed once per host when processing ends.

use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Channel;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::config::{Credentials, SshConfig};
use super::handler::SshHandler;
use crate::error::{BaselineError, Result};

/// Authenticated SSH session bound to one host
pub struct SshChannel {
    /// SSH configuration
    config: SshConfig,

    /// Active SSH session handle
    session: Mutex<Handle<SshHandler>>,
}

impl SshChannel {
    /// Connect and authenticate
    ///
    /// Fails with `Connection` on network, handshake or timeout errors and
    /// with `Authentication` / `SshKey` when credentials are unusable or
    /// rejected.
    pub async fn open(config: SshConfig) -> Result<Self> {
        info!("Connecting to SSH server {}...", config.address());

        let ssh_config = Arc::new(client::Config::default());
        let handler = SshHandler::new(
            config.host.clone(),
            config.port,
            config.strict_host_key_checking,
        );

        let connect_result = timeout(
            config.connect_timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(BaselineError::connection(e.to_string()));
            }
            Err(_) => {
                error!(
                    "SSH connection timeout after {}s",
                    config.connect_timeout.as_secs()
                );
                return Err(BaselineError::connection(format!(
                    "Connection timeout after {}s",
                    config.connect_timeout.as_secs()
                )));
            }
        };

        authenticate(&config, &mut session).await?;

        info!(
            "Successfully connected to {}@{}",
            config.username,
            config.address()
        );

        Ok(Self {
            config,
            session: Mutex::new(session),
        })
    }

    /// Open a new session channel
    pub(crate) async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let session = self.session.lock().await;
        session
            .channel_open_session()
            .await
            .map_err(|e| BaselineError::connection(format!("Failed to open channel: {}", e)))
    }

    /// Disconnect the session
    pub async fn disconnect(&self) {
        let session = self.session.lock().await;
        if let Err(e) = session
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.config.address(), e);
        }
        info!("SSH connection to {} closed", self.config.address());
    }
}

/// Authenticate with the SSH server
async fn authenticate(config: &SshConfig, session: &mut Handle<SshHandler>) -> Result<()> {
    match config.credentials {
        Credentials::Password(ref password) => {
            debug!(
                "Attempting password authentication for user '{}'",
                config.username
            );
            let auth_result = session
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| BaselineError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Password authentication successful");
                Ok(())
            } else {
                Err(BaselineError::auth("Password authentication rejected"))
            }
        }
        Credentials::Key {
            ref path,
            ref passphrase,
        } => {
            debug!(
                "Attempting key authentication for user '{}' with {}",
                config.username,
                path.display()
            );

            let key_content = tokio::fs::read_to_string(path).await.map_err(|e| {
                BaselineError::SshKey(format!("Failed to read {}: {}", path.display(), e))
            })?;

            // Handles OpenSSH and PEM encodings, decrypting when a passphrase is set
            let key = russh::keys::decode_secret_key(&key_content, passphrase.as_deref())
                .map_err(|e| BaselineError::SshKey(format!("Failed to parse private key: {}", e)))?;

            // RSA keys need the strongest hash the server accepts
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(|e| BaselineError::auth(e.to_string()))?
                .flatten();
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

            let auth_result = session
                .authenticate_publickey(&config.username, key_with_alg)
                .await
                .map_err(|e| BaselineError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Key authentication successful");
                Ok(())
            } else {
                Err(BaselineError::auth("Key authentication rejected"))
            }
        }
    }
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .finish()
    }
}

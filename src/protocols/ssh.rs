//! SSH protocol using russh.
//!
//! Authenticates with a private key file, a password, or both (key first),
//! and runs commands over non-interactive exec channels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::Mutex;

use crate::connection::{CommandOutput, HostConnection};
use crate::error::{BrokerError, Result};
use crate::options::{keys, ConnectionOptions, OperatingSystemFamily};
use crate::protocol::{ConnectionBuilder, ConstructBuilder};

const DEFAULT_PORT: u16 = 22;

pub struct SshConnectionBuilder {
    protocol: String,
    address: String,
    port: u16,
    username: String,
    password: Option<String>,
    key_path: Option<PathBuf>,
    passphrase: Option<String>,
    timeout: Duration,
    os: OperatingSystemFamily,
}

impl ConstructBuilder for SshConnectionBuilder {
    fn construct(protocol: &str, options: &ConnectionOptions) -> Result<Self> {
        let password: Option<String> = options.get_optional(keys::PASSWORD)?;
        let key_path = options
            .get_optional::<String>(keys::PRIVATE_KEY_FILE)?
            .map(|path| PathBuf::from(shellexpand::tilde(&path).as_ref()));

        if password.is_none() && key_path.is_none() {
            return Err(BrokerError::invalid_option(
                keys::PASSWORD,
                "either password or private_key_file must be set",
            ));
        }

        Ok(Self {
            protocol: protocol.to_string(),
            address: options.get(keys::ADDRESS)?,
            port: options.get_or(keys::PORT, DEFAULT_PORT)?,
            username: options.get(keys::USERNAME)?,
            password,
            key_path,
            passphrase: options.get_optional(keys::PASSPHRASE)?,
            timeout: options.connection_timeout()?,
            os: options.get_or(keys::OPERATING_SYSTEM, OperatingSystemFamily::Unix)?,
        })
    }
}

impl SshConnectionBuilder {
    fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    async fn open_session(&self) -> Result<Handle<ClientHandler>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            // Send keep-alive every 15 seconds
            keepalive_interval: Some(Duration::from_secs(15)),
            // Allow up to 4 missed keep-alives before disconnect (60 seconds)
            keepalive_max: 4,
            ..Default::default()
        });

        let mut session = client::connect(
            config,
            (self.address.as_str(), self.port),
            ClientHandler,
        )
        .await
        .map_err(|e| BrokerError::unreachable(self.target(), e.to_string()))?;

        self.authenticate(&mut session).await?;
        Ok(session)
    }

    async fn authenticate(&self, session: &mut Handle<ClientHandler>) -> Result<()> {
        if let Some(key_path) = &self.key_path {
            let key = russh_keys::load_secret_key(key_path, self.passphrase.as_deref())
                .map_err(|e| {
                    BrokerError::invalid_option(
                        keys::PRIVATE_KEY_FILE,
                        format!("Failed to load {}: {}", key_path.display(), e),
                    )
                })?;

            if session
                .authenticate_publickey(&self.username, Arc::new(key))
                .await?
            {
                tracing::debug!("Authenticated to {} with key {}", self.target(), key_path.display());
                return Ok(());
            }
            tracing::debug!("Server rejected key {}", key_path.display());
        }

        if let Some(password) = &self.password {
            if session
                .authenticate_password(&self.username, password)
                .await?
            {
                tracing::debug!("Authenticated to {} with password", self.target());
                return Ok(());
            }
        }

        Err(BrokerError::auth(
            &self.protocol,
            format!("{}@{} rejected all credentials", self.username, self.target()),
        ))
    }
}

#[async_trait]
impl ConnectionBuilder for SshConnectionBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        let session = tokio::time::timeout(self.timeout, self.open_session())
            .await
            .map_err(|_| BrokerError::timeout(format!("SSH connect to {}", self.target()), self.timeout))??;

        Ok(Box::new(SshConnection {
            protocol: self.protocol,
            session: Mutex::new(Some(session)),
            os: self.os,
        }))
    }
}

/// Client handler for russh connection callbacks.
pub struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = BrokerError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // TODO: verify against known_hosts once a host key policy option exists
        Ok(true)
    }
}

/// Authenticated SSH session.
pub struct SshConnection {
    protocol: String,
    session: Mutex<Option<Handle<ClientHandler>>>,
    os: OperatingSystemFamily,
}

#[async_trait]
impl HostConnection for SshConnection {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn operating_system(&self) -> OperatingSystemFamily {
        self.os
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let session = self.session.lock().await;
        let session = session
            .as_ref()
            .ok_or_else(|| BrokerError::other("SSH connection is closed"))?;

        let mut channel = session.channel_open_session().await?;
        channel.exec(true, command.as_bytes()).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1i64;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = i64::from(exit_status);
                }
                Some(ChannelMsg::Close) | None => {
                    break;
                }
                _ => {}
            }
        }

        Ok(CommandOutput::from_bytes(&stdout, &stderr, exit_code))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await?;
        }
        Ok(())
    }
}

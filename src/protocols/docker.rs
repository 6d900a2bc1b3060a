//! Docker protocol: executes commands inside a running container.
//!
//! Uses the bollard exec API, so no docker CLI is needed on the host.

use std::path::PathBuf;

use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::{Stream, StreamExt};

use async_trait::async_trait;

use crate::connection::{CommandOutput, HostConnection};
use crate::error::{BrokerError, Result};
use crate::options::{keys, ConnectionOptions, OperatingSystemFamily};
use crate::protocol::{ConnectionBuilder, ConstructBuilder};

const DEFAULT_USER: &str = "root";

/// Where the Docker daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Platform default socket (`/var/run/docker.sock` or `DOCKER_HOST`)
    Default,
    /// Unix socket path
    Socket(String),
    /// HTTP endpoint (`tcp://` is accepted as an alias)
    Http(String),
    /// TLS endpoint with the `key.pem`, `cert.pem` and `ca.pem` found in `cert_path`
    Tls { address: String, cert_path: PathBuf },
}

impl DockerEndpoint {
    pub fn parse(host: &str) -> Result<Self> {
        if let Some(path) = host.strip_prefix("unix://") {
            Ok(Self::Socket(path.to_string()))
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            Ok(Self::Http(format!("http://{}", addr)))
        } else if host.starts_with("http://") {
            Ok(Self::Http(host.to_string()))
        } else {
            Err(BrokerError::invalid_option(
                keys::DOCKER_HOST,
                format!("unsupported endpoint '{}', expected unix://, tcp:// or http://", host),
            ))
        }
    }

    /// Endpoint for a daemon that requires client certificates.
    pub fn parse_tls(host: &str, cert_path: PathBuf) -> Result<Self> {
        let addr = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("https://"))
            .ok_or_else(|| {
                BrokerError::invalid_option(
                    keys::DOCKER_HOST,
                    format!("'{}' cannot use TLS, expected tcp:// or https://", host),
                )
            })?;

        Ok(Self::Tls {
            address: format!("tcp://{}", addr),
            cert_path,
        })
    }

    fn describe(&self) -> &str {
        match self {
            Self::Default => "default docker socket",
            Self::Socket(path) => path,
            Self::Http(addr) => addr,
            Self::Tls { address, .. } => address,
        }
    }
}

pub struct DockerConnectionBuilder {
    protocol: String,
    endpoint: DockerEndpoint,
    container: String,
    user: String,
    timeout_secs: u64,
    os: OperatingSystemFamily,
}

impl ConstructBuilder for DockerConnectionBuilder {
    fn construct(protocol: &str, options: &ConnectionOptions) -> Result<Self> {
        let host: Option<String> = options.get_optional(keys::DOCKER_HOST)?;
        let cert_path = options
            .get_optional::<String>(keys::DOCKER_CERT_PATH)?
            .map(|path| PathBuf::from(shellexpand::tilde(&path).as_ref()));

        let endpoint = match (host, cert_path) {
            (Some(host), Some(cert_path)) => DockerEndpoint::parse_tls(&host, cert_path)?,
            (Some(host), None) => DockerEndpoint::parse(&host)?,
            (None, Some(_)) => {
                return Err(BrokerError::invalid_option(
                    keys::DOCKER_CERT_PATH,
                    "docker_host must be set when using TLS",
                ));
            }
            (None, None) => DockerEndpoint::Default,
        };

        Ok(Self {
            protocol: protocol.to_string(),
            endpoint,
            container: options.get(keys::DOCKER_CONTAINER)?,
            user: options.get_or(keys::DOCKER_USER, DEFAULT_USER.to_string())?,
            timeout_secs: options.connection_timeout()?.as_secs().max(1),
            os: options.get_or(keys::OPERATING_SYSTEM, OperatingSystemFamily::Unix)?,
        })
    }
}

impl DockerConnectionBuilder {
    fn client(&self) -> Result<Docker> {
        let client = match &self.endpoint {
            DockerEndpoint::Default => Docker::connect_with_socket_defaults(),
            DockerEndpoint::Socket(path) => {
                Docker::connect_with_socket(path, self.timeout_secs, API_DEFAULT_VERSION)
            }
            DockerEndpoint::Http(addr) => {
                Docker::connect_with_http(addr, self.timeout_secs, API_DEFAULT_VERSION)
            }
            DockerEndpoint::Tls { address, cert_path } => Docker::connect_with_ssl(
                address,
                &cert_path.join("key.pem"),
                &cert_path.join("cert.pem"),
                &cert_path.join("ca.pem"),
                self.timeout_secs,
                API_DEFAULT_VERSION,
            ),
        };

        client.map_err(|e| {
            BrokerError::unreachable(
                self.endpoint.describe(),
                format!("Failed to connect to Docker: {}", e),
            )
        })
    }
}

#[async_trait]
impl ConnectionBuilder for DockerConnectionBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        let client = self.client()?;

        client.ping().await.map_err(|e| {
            BrokerError::unreachable(self.endpoint.describe(), format!("Docker daemon not responding: {}", e))
        })?;

        let info = client.inspect_container(&self.container, None).await?;
        let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
        if !running {
            return Err(BrokerError::unreachable(
                &self.container,
                "Container is not running",
            ));
        }

        tracing::debug!("Connected to container {} as {}", self.container, self.user);

        let builder = *self;
        Ok(Box::new(DockerConnection {
            protocol: builder.protocol,
            client,
            container: builder.container,
            user: builder.user,
            os: builder.os,
        }))
    }
}

/// Connection to a running container.
pub struct DockerConnection {
    protocol: String,
    client: Docker,
    container: String,
    user: String,
    os: OperatingSystemFamily,
}

impl DockerConnection {
    pub fn container(&self) -> &str {
        &self.container
    }
}

#[async_trait]
impl HostConnection for DockerConnection {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn operating_system(&self) -> OperatingSystemFamily {
        self.os
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let (shell, flag) = self.os.default_shell();
        let exec = self
            .client
            .create_exec(
                &self.container,
                CreateExecOptions {
                    cmd: Some(vec![shell, flag, command]),
                    user: Some(self.user.as_str()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let output = self
            .client
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await?;

        let (stdout, stderr) = match output {
            StartExecResults::Attached { output, .. } => collect_output(output).await?,
            StartExecResults::Detached => {
                return Err(BrokerError::other("Unexpected detached exec"));
            }
        };

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(CommandOutput::from_bytes(&stdout, &stderr, exit_code))
    }
}

/// Drain an exec output stream into stdout and stderr buffers.
///
/// A broken stream means truncated output, so it fails the whole command
/// instead of returning a partial result.
async fn collect_output<S>(mut output: S) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    while let Some(chunk) = output.next().await {
        match chunk? {
            LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
            _ => {}
        }
    }

    Ok((stdout, stderr))
}

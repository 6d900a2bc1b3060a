//! Local protocol: runs commands on this machine through the system shell.

use async_trait::async_trait;
use tokio::process::Command;

use crate::connection::{CommandOutput, HostConnection};
use crate::error::Result;
use crate::options::{ConnectionOptions, OperatingSystemFamily};
use crate::protocol::{ConnectionBuilder, ConstructBuilder};

pub struct LocalConnectionBuilder {
    protocol: String,
    os: OperatingSystemFamily,
}

impl ConstructBuilder for LocalConnectionBuilder {
    fn construct(protocol: &str, options: &ConnectionOptions) -> Result<Self> {
        Ok(Self {
            protocol: protocol.to_string(),
            os: options.operating_system()?,
        })
    }
}

#[async_trait]
impl ConnectionBuilder for LocalConnectionBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        tracing::debug!("Opening local connection ({})", self.os);
        Ok(Box::new(LocalConnection {
            protocol: self.protocol,
            os: self.os,
        }))
    }
}

/// Connection to the machine this process runs on.
pub struct LocalConnection {
    protocol: String,
    os: OperatingSystemFamily,
}

#[async_trait]
impl HostConnection for LocalConnection {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn operating_system(&self) -> OperatingSystemFamily {
        self.os
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let (shell, flag) = self.os.default_shell();
        tracing::debug!("Executing locally: {}", command);

        let output = Command::new(shell)
            .arg(flag)
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;

        let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
        Ok(CommandOutput::from_bytes(
            &output.stdout,
            &output.stderr,
            exit_code,
        ))
    }
}

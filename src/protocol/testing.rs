//! Fake protocol builders shared by the protocol tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{ConnectionBuilder, ConstructBuilder};
use crate::connection::{CommandOutput, HostConnection};
use crate::error::{BrokerError, Result};
use crate::options::{keys, ConnectionOptions, OperatingSystemFamily};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Connection that answers `instance` with its own id and echoes anything else.
pub struct EchoConnection {
    protocol: String,
    instance: u64,
}

#[async_trait]
impl HostConnection for EchoConnection {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn operating_system(&self) -> OperatingSystemFamily {
        OperatingSystemFamily::Unix
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        if command == "instance" {
            return Ok(CommandOutput::new(self.instance.to_string(), "", 0));
        }
        Ok(CommandOutput::new(command, "", 0))
    }
}

fn echo(protocol: &str) -> Box<dyn HostConnection> {
    Box::new(EchoConnection {
        protocol: protocol.to_string(),
        instance: NEXT_INSTANCE.fetch_add(1, Ordering::SeqCst),
    })
}

macro_rules! fake_builder {
    ($name:ident) => {
        pub struct $name {
            protocol: String,
        }

        impl ConstructBuilder for $name {
            fn construct(protocol: &str, _options: &ConnectionOptions) -> Result<Self> {
                Ok(Self {
                    protocol: protocol.to_string(),
                })
            }
        }
    };
}

fake_builder!(EchoBuilder);

#[async_trait]
impl ConnectionBuilder for EchoBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Ok(echo(&self.protocol))
    }
}

fake_builder!(OtherEchoBuilder);

#[async_trait]
impl ConnectionBuilder for OtherEchoBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Ok(echo(&self.protocol))
    }
}

// Reports a different protocol than the one it was built for.
fake_builder!(MislabeledBuilder);

#[async_trait]
impl ConnectionBuilder for MislabeledBuilder {
    fn protocol(&self) -> &str {
        "telnet"
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Ok(echo(&self.protocol))
    }
}

// Remote end refuses the handshake with an error type of its own.
fake_builder!(RefusedBuilder);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRefused {
    pub banner: String,
}

impl std::fmt::Display for HandshakeRefused {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handshake refused: {}", self.banner)
    }
}

impl std::error::Error for HandshakeRefused {}

#[async_trait]
impl ConnectionBuilder for RefusedBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Err(BrokerError::plugin(HandshakeRefused {
            banner: "maintenance window".to_string(),
        }))
    }
}

fake_builder!(DeniedBuilder);

#[async_trait]
impl ConnectionBuilder for DeniedBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Err(BrokerError::auth(&self.protocol, "publickey denied"))
    }
}

/// Validates `port` eagerly and rejects anything but a number.
pub struct StrictBuilder {
    protocol: String,
}

impl ConstructBuilder for StrictBuilder {
    fn construct(protocol: &str, options: &ConnectionOptions) -> Result<Self> {
        let _port: u16 = options.get(keys::PORT)?;
        Ok(Self {
            protocol: protocol.to_string(),
        })
    }
}

#[async_trait]
impl ConnectionBuilder for StrictBuilder {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        Ok(echo(&self.protocol))
    }
}

/// Cannot be instantiated at all.
pub struct PanickingBuilder;

impl ConstructBuilder for PanickingBuilder {
    fn construct(_protocol: &str, _options: &ConnectionOptions) -> Result<Self> {
        panic!("builder state poisoned");
    }
}

#[async_trait]
impl ConnectionBuilder for PanickingBuilder {
    fn protocol(&self) -> &str {
        "panicking"
    }

    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
        unreachable!("never constructed")
    }
}

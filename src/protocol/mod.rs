//! Protocol plugin layer.
//!
//! This module defines the contract every protocol implementation fulfils and
//! the machinery that turns a protocol name into a live connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ProtocolCandidate│  ← submitted with register_protocol!
//! └────────┬─────────┘
//!          │ discovery
//!          ▼
//! ┌──────────────────┐
//! │ ProtocolRegistry │  ← name → ProtocolDescriptor
//! └────────┬─────────┘
//!          │ lookup
//!          ▼
//! ┌──────────────────┐
//! │ConnectionFactory │  ← construct + connect
//! └────────┬─────────┘
//!          ▼
//!   Box<dyn HostConnection>
//! ```
//!
//! # Adding a New Protocol
//!
//! 1. Implement [`ConnectionBuilder`] and [`ConstructBuilder`] for a builder type
//! 2. Register it with [`register_protocol!`](crate::register_protocol)

pub mod discovery;
pub mod factory;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::connection::HostConnection;
use crate::error::Result;
use crate::options::ConnectionOptions;

pub use discovery::{
    Discovery, DiscoveryOptions, DuplicatePolicy, ProtocolCandidate, SkipReason, SkippedCandidate,
};
pub use factory::{get_connection, ConnectionFactory};
pub use registry::{ProtocolRegistry, ProtocolTable, RegistryState};

/// A configured, not yet connected, protocol instance.
#[async_trait]
pub trait ConnectionBuilder: Send {
    /// Protocol name this builder was constructed for
    fn protocol(&self) -> &str;

    /// Perform the handshake and hand back the live connection.
    async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>>;
}

/// Construction half of the builder contract.
///
/// Implementations may validate options eagerly and fail here; such errors
/// reach the caller unchanged.
pub trait ConstructBuilder: ConnectionBuilder + Sized + 'static {
    fn construct(protocol: &str, options: &ConnectionOptions) -> Result<Self>;
}

/// Type-erased constructor stored in a [`ProtocolDescriptor`].
pub type BuilderConstructor = fn(&str, &ConnectionOptions) -> Result<Box<dyn ConnectionBuilder>>;

/// Erase a [`ConstructBuilder`] into a [`BuilderConstructor`].
pub fn construct_boxed<B: ConstructBuilder>(
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Box<dyn ConnectionBuilder>> {
    Ok(Box::new(B::construct(protocol, options)?))
}

/// A protocol implementation known to the registry.
#[derive(Clone)]
pub struct ProtocolDescriptor {
    name: String,
    implementation: &'static str,
    constructor: BuilderConstructor,
}

impl ProtocolDescriptor {
    pub fn new(
        name: impl Into<String>,
        implementation: &'static str,
        constructor: BuilderConstructor,
    ) -> Self {
        Self {
            name: name.into(),
            implementation,
            constructor,
        }
    }

    /// Descriptor for a [`ConstructBuilder`] type.
    pub fn of<B: ConstructBuilder>(name: impl Into<String>) -> Self {
        Self::new(name, std::any::type_name::<B>(), construct_boxed::<B>)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the builder type behind this protocol
    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    pub(crate) fn constructor(&self) -> BuilderConstructor {
        self.constructor
    }
}

impl std::fmt::Debug for ProtocolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDescriptor")
            .field("name", &self.name)
            .field("implementation", &self.implementation)
            .finish()
    }
}

/// Check that `name` can serve as a registry key.
pub fn is_valid_protocol_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '+')
        })
}

/// Registers a protocol builder for discovery.
///
/// ```ignore
/// hostbroker::register_protocol!("local", LocalConnectionBuilder);
/// ```
#[macro_export]
macro_rules! register_protocol {
    ($name:expr, $builder:ty) => {
        $crate::__inventory::submit! {
            $crate::protocol::ProtocolCandidate::new(
                $name,
                stringify!($builder),
                Some($crate::protocol::construct_boxed::<$builder> as $crate::protocol::BuilderConstructor),
            )
        }
    };
}

/// Declares a protocol whose builder is not compiled in.
///
/// Discovery reports it and keeps it out of the registry.
#[macro_export]
macro_rules! declare_protocol {
    ($name:expr, $implementation:expr) => {
        $crate::__inventory::submit! {
            $crate::protocol::ProtocolCandidate::new($name, $implementation, None)
        }
    };
}

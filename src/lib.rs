//! hostbroker: a pluggable connection broker for remote hosts.
//!
//! Protocol implementations register themselves at compile time. At startup
//! they are discovered into a registry, and callers ask the factory for a
//! connection by protocol name:
//!
//! ```ignore
//! use hostbroker::{keys, ConnectionOptions};
//!
//! let options = ConnectionOptions::new()
//!     .with(keys::ADDRESS, "build-01.internal")
//!     .with(keys::USERNAME, "deploy")
//!     .with(keys::PRIVATE_KEY_FILE, "~/.ssh/id_ed25519");
//! let connection = hostbroker::get_connection("ssh", &options).await?;
//! println!("{}", connection.execute("uptime").await?.stdout);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod options;
pub mod protocol;
pub mod protocols;

pub use config::{BrokerConfig, ConnectionProfile};
pub use connection::{CommandOutput, HostConnection};
pub use error::{BrokerError, ErrorClass, Result};
pub use options::{keys, ConnectionOptions, OperatingSystemFamily, DEFAULT_CONNECTION_TIMEOUT};
pub use protocol::{
    get_connection, ConnectionBuilder, ConnectionFactory, ConstructBuilder, DiscoveryOptions,
    DuplicatePolicy, ProtocolDescriptor, ProtocolRegistry,
};

#[doc(hidden)]
pub use inventory as __inventory;

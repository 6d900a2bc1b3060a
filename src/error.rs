//! Broker error types.
//!
//! A single error type is shared by the broker core and by protocol
//! implementations. Errors a protocol raises travel back to the caller as the
//! exact same value, so callers can match on protocol conditions (for example
//! [`BrokerError::Authentication`]) no matter which protocol produced them.

use std::time::Duration;

use thiserror::Error;

/// Broad category of a [`BrokerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The request or the broker setup is wrong (unknown protocol, duplicate
    /// registration, registry lifecycle misuse). Retrying will not help.
    Configuration,
    /// A registered protocol implementation is broken.
    PluginDefect,
    /// Raised by the protocol itself while validating options or connecting.
    Application,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::PluginDefect => write!(f, "plugin-defect"),
            ErrorClass::Application => write!(f, "application"),
        }
    }
}

/// Errors produced while resolving, building or connecting a protocol.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No implementation is registered for the requested protocol
    #[error("Unknown connection protocol '{name}'. Registered protocols: {supported:?}")]
    UnknownProtocol {
        name: String,
        supported: Vec<String>,
    },

    /// Two implementations declared the same protocol name
    #[error("Protocol '{name}' is declared by both {existing} and {replacement}")]
    DuplicateProtocol {
        name: String,
        existing: String,
        replacement: String,
    },

    /// A protocol name that cannot be used as a registry key
    #[error("Invalid protocol name '{name}' declared by {implementation}")]
    InvalidProtocolName {
        name: String,
        implementation: String,
    },

    /// The registry has already been published
    #[error("Protocol registry has already been published")]
    AlreadyPublished,

    /// The registry was used before it was published
    #[error("Protocol registry has not been published yet")]
    NotPublished,

    /// Broker configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The implementation does not honour the builder contract
    #[error("{implementation} is not a usable connection builder: {reason}")]
    IncompatibleImplementation {
        implementation: String,
        reason: String,
    },

    /// The implementation could not be instantiated
    #[error("Could not instantiate {implementation}: {cause}")]
    InstantiationFailure {
        implementation: String,
        cause: String,
    },

    /// A required connection option is absent
    #[error("Missing connection option '{key}'")]
    MissingOption { key: String },

    /// A connection option is present but unusable
    #[error("Invalid connection option '{key}': {message}")]
    InvalidOption { key: String, message: String },

    /// The remote end rejected the credentials
    #[error("Authentication failed for {protocol}: {message}")]
    Authentication { protocol: String, message: String },

    /// The target could not be reached
    #[error("Cannot reach {address}: {message}")]
    Unreachable { address: String, message: String },

    /// Operation timed out
    #[error("Operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "docker")]
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[cfg(feature = "ssh")]
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Error type owned by an out-of-tree protocol implementation
    #[error(transparent)]
    Plugin(Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Generic protocol error for edge cases
    #[error("{message}")]
    Other { message: String },
}

impl BrokerError {
    /// Create a missing option error
    pub fn missing_option(key: impl Into<String>) -> Self {
        Self::MissingOption { key: key.into() }
    }

    /// Create an invalid option error
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(protocol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Create an unreachable target error
    pub fn unreachable(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Wrap an error type owned by a protocol implementation
    pub fn plugin<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Plugin(Box::new(err))
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownProtocol { .. }
            | Self::DuplicateProtocol { .. }
            | Self::InvalidProtocolName { .. }
            | Self::AlreadyPublished
            | Self::NotPublished
            | Self::Config(_) => ErrorClass::Configuration,
            Self::IncompatibleImplementation { .. } | Self::InstantiationFailure { .. } => {
                ErrorClass::PluginDefect
            }
            _ => ErrorClass::Application,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }

    pub fn is_plugin_defect(&self) -> bool {
        self.class() == ErrorClass::PluginDefect
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct VaultSealed;

    impl std::fmt::Display for VaultSealed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "vault is sealed")
        }
    }

    impl std::error::Error for VaultSealed {}

    #[test]
    fn test_unknown_protocol_display() {
        let err = BrokerError::UnknownProtocol {
            name: "ssh".to_string(),
            supported: vec!["docker".to_string(), "local".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown connection protocol 'ssh'. Registered protocols: [\"docker\", \"local\"]"
        );
    }

    #[test]
    fn test_auth_error_display() {
        let err = BrokerError::auth("ssh", "Permission denied");
        assert_eq!(err.to_string(), "Authentication failed for ssh: Permission denied");
    }

    #[test]
    fn test_timeout_error() {
        let err = BrokerError::timeout("ssh handshake", Duration::from_secs(120));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.class(), ErrorClass::Application);
    }

    #[test]
    fn test_classification() {
        assert!(BrokerError::AlreadyPublished.is_configuration());
        assert!(BrokerError::NotPublished.is_configuration());
        assert!(BrokerError::Config("bad".to_string()).is_configuration());
        assert!(BrokerError::InstantiationFailure {
            implementation: "X".to_string(),
            cause: "panic".to_string(),
        }
        .is_plugin_defect());
        assert!(BrokerError::IncompatibleImplementation {
            implementation: "X".to_string(),
            reason: "wrong protocol".to_string(),
        }
        .is_plugin_defect());
        assert_eq!(
            BrokerError::missing_option("address").class(),
            ErrorClass::Application
        );
        assert_eq!(BrokerError::plugin(VaultSealed).class(), ErrorClass::Application);
    }

    #[test]
    fn test_plugin_error_is_transparent() {
        let err = BrokerError::plugin(VaultSealed);
        assert_eq!(err.to_string(), "vault is sealed");

        match err {
            BrokerError::Plugin(inner) => {
                assert_eq!(inner.downcast_ref::<VaultSealed>(), Some(&VaultSealed));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::Configuration.to_string(), "configuration");
        assert_eq!(ErrorClass::PluginDefect.to_string(), "plugin-defect");
        assert_eq!(ErrorClass::Application.to_string(), "application");
    }
}

//! Typed connection options.
//!
//! The broker never looks inside [`ConnectionOptions`]; it forwards them to the
//! protocol builder, which reads the keys it understands. Values are stored as
//! JSON values so options can come from YAML profiles, the command line, or
//! code alike.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};

/// Default time a protocol may spend establishing a connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Well-known option keys.
pub mod keys {
    /// Host name or IP address of the target
    pub const ADDRESS: &str = "address";
    /// Port of the target service
    pub const PORT: &str = "port";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    /// Operating system family of the target, see [`super::OperatingSystemFamily`]
    pub const OPERATING_SYSTEM: &str = "operating_system";
    /// Connection timeout in milliseconds
    pub const CONNECTION_TIMEOUT_MILLIS: &str = "connection_timeout_millis";
    /// Private key used for public key authentication
    pub const PRIVATE_KEY_FILE: &str = "private_key_file";
    /// Passphrase of `private_key_file`
    pub const PASSPHRASE: &str = "passphrase";
    /// Docker daemon endpoint (`unix://...`, `tcp://...` or `http://...`)
    pub const DOCKER_HOST: &str = "docker_host";
    pub const DOCKER_CONTAINER: &str = "docker_container";
    pub const DOCKER_USER: &str = "docker_user";
    /// Directory holding `key.pem`, `cert.pem` and `ca.pem` for a TLS daemon
    pub const DOCKER_CERT_PATH: &str = "docker_cert_path";
}

/// Operating system family of a connection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystemFamily {
    Unix,
    Windows,
    Zos,
}

impl OperatingSystemFamily {
    /// Family of the machine this process runs on.
    pub fn local() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Windows => "windows",
            Self::Zos => "zos",
        }
    }

    /// Shell program and flag used to run a command line.
    pub fn default_shell(&self) -> (&'static str, &'static str) {
        match self {
            Self::Windows => ("cmd.exe", "/C"),
            Self::Unix | Self::Zos => ("sh", "-c"),
        }
    }
}

impl std::fmt::Display for OperatingSystemFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed key-value options handed to a protocol builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionOptions {
    values: BTreeMap<String, Value>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, replacing any previous value.
    pub fn set<V: Into<Value>>(&mut self, key: impl Into<String>, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Builder-style [`set`](Self::set).
    pub fn with<V: Into<Value>>(mut self, key: impl Into<String>, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Set an option from any serializable value (enums, nested structs).
    pub fn set_serialized<V: Serialize>(&mut self, key: impl Into<String>, value: &V) -> Result<&mut Self> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| BrokerError::invalid_option(&key, e.to_string()))?;
        self.values.insert(key, value);
        Ok(self)
    }

    /// Read a required option.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_optional(key)?
            .ok_or_else(|| BrokerError::missing_option(key))
    }

    /// Read an option that may be absent. A present value of the wrong type is
    /// still an error.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| BrokerError::invalid_option(key, e.to_string())),
        }
    }

    /// Read an option, falling back to `default` when absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_optional(key)?.unwrap_or(default))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `connection_timeout_millis`, or [`DEFAULT_CONNECTION_TIMEOUT`].
    pub fn connection_timeout(&self) -> Result<Duration> {
        Ok(self
            .get_optional::<u64>(keys::CONNECTION_TIMEOUT_MILLIS)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT))
    }

    /// `operating_system`, or the family of the local machine.
    pub fn operating_system(&self) -> Result<OperatingSystemFamily> {
        self.get_or(keys::OPERATING_SYSTEM, OperatingSystemFamily::local())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConnectionOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for ConnectionOptions {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.values
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

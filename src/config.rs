use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::options::{keys, ConnectionOptions};
use crate::protocol::{is_valid_protocol_name, DiscoveryOptions, DuplicatePolicy};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "HOSTBROKER_CONFIG";

/// Comma-separated protocol names to disable on top of the config file.
pub const DISABLED_PROTOCOLS_ENV: &str = "HOSTBROKER_DISABLED_PROTOCOLS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub disabled_protocols: BTreeSet<String>,
    /// Named connection profiles
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connections: BTreeMap<String, ConnectionProfile>,
}

/// A protocol plus the options to connect with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub protocol: String,
    /// Connection timeout such as `30s`, `2m` or `120`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "ConnectionOptions::is_empty")]
    pub options: ConnectionOptions,
}

impl ConnectionProfile {
    pub fn new(protocol: impl Into<String>, options: ConnectionOptions) -> Self {
        Self {
            protocol: protocol.into(),
            timeout: None,
            options,
        }
    }

    /// Options to hand to the protocol, with `timeout` folded in as
    /// `connection_timeout_millis`.
    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        let mut options = self.options.clone();
        if let Some(timeout) = &self.timeout {
            let duration = parse_duration(timeout).ok_or_else(|| {
                BrokerError::Config(format!(
                    "Invalid timeout '{}'. Use format like '30s', '2m', or '120'",
                    timeout
                ))
            })?;
            options.set(
                keys::CONNECTION_TIMEOUT_MILLIS,
                u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            );
        }
        Ok(options)
    }
}

impl BrokerConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| BrokerError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".config").join("hostbroker"))
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from the default location, falling back to defaults when no file exists.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            config.apply_env();
            return Ok(config);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BrokerError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: BrokerConfig = serde_yaml::from_str(&content)
            .map_err(|e| BrokerError::Config(format!("Invalid config: {}", e)))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(names) = std::env::var(DISABLED_PROTOCOLS_ENV) {
            self.disabled_protocols.extend(
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            );
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| BrokerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;

        // Profiles may carry passwords.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for name in &self.disabled_protocols {
            if !is_valid_protocol_name(name) {
                return Err(BrokerError::Config(format!(
                    "Invalid protocol name '{}' in disabled_protocols",
                    name
                )));
            }
        }

        for (profile_name, profile) in &self.connections {
            if !is_valid_protocol_name(&profile.protocol) {
                return Err(BrokerError::Config(format!(
                    "Connection '{}' uses invalid protocol name '{}'",
                    profile_name, profile.protocol
                )));
            }
            if let Some(timeout) = &profile.timeout {
                if parse_duration(timeout).is_none() {
                    return Err(BrokerError::Config(format!(
                        "Connection '{}' has invalid timeout '{}'. Use format like '30s', '2m', or '120'",
                        profile_name, timeout
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a named connection profile.
    pub fn profile(&self, name: &str) -> Result<&ConnectionProfile> {
        self.connections.get(name).ok_or_else(|| {
            BrokerError::Config(format!(
                "Unknown connection '{}'. Configured connections: {:?}",
                name,
                self.connections.keys().collect::<Vec<_>>()
            ))
        })
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            duplicate_policy: self.duplicate_policy,
            disabled: self.disabled_protocols.clone(),
        }
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

//! Protocol registry.
//!
//! Maps protocol names to [`ProtocolDescriptor`]s. The table is published
//! once, as a whole, and read through lock-free snapshots afterwards. Later
//! registrations copy the current table, add to it, and swap the new table in,
//! so a reader always sees either the old table or the new one.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use arc_swap::ArcSwapOption;

use super::discovery::{Discovery, DiscoveryOptions, SkippedCandidate};
use super::{is_valid_protocol_name, ProtocolDescriptor};
use crate::error::{BrokerError, Result};

/// Name → descriptor table held by a published registry.
pub type ProtocolTable = HashMap<String, Arc<ProtocolDescriptor>>;

/// Lifecycle of a [`ProtocolRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Populated,
}

/// Registry of protocol implementations.
pub struct ProtocolRegistry {
    table: ArcSwapOption<ProtocolTable>,
    skipped: ArcSwapOption<Vec<SkippedCandidate>>,
    // Serializes writers; readers never take it.
    write_lock: Mutex<()>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLock<std::result::Result<ProtocolRegistry, String>> = LazyLock::new(|| {
    ProtocolRegistry::discover(DiscoveryOptions::default()).map_err(|e| e.to_string())
});

impl ProtocolRegistry {
    /// Create an unpublished registry
    pub fn new() -> Self {
        Self {
            table: ArcSwapOption::empty(),
            skipped: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a registry already published with `table`
    pub fn with_table(table: ProtocolTable) -> Self {
        Self {
            table: ArcSwapOption::from_pointee(table),
            skipped: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Run discovery over the `inventory` candidates and publish the result.
    pub fn discover(options: DiscoveryOptions) -> Result<Self> {
        let registry = Self::new();
        registry.publish_discovery(Discovery::from_inventory(options)?)?;
        Ok(registry)
    }

    /// The process-wide registry, discovered with default options on first use.
    pub fn global() -> Result<&'static ProtocolRegistry> {
        GLOBAL
            .as_ref()
            .map_err(|e| BrokerError::Config(format!("protocol discovery failed: {}", e)))
    }

    /// Publish the initial table. Only the first call succeeds.
    pub fn publish(&self, table: ProtocolTable) -> Result<()> {
        let _guard = self.lock();

        if self.table.load().is_some() {
            return Err(BrokerError::AlreadyPublished);
        }

        tracing::info!("Publishing {} connection protocols", table.len());
        self.table.store(Some(Arc::new(table)));
        Ok(())
    }

    /// Publish the outcome of a discovery run, keeping its skip report.
    pub fn publish_discovery(&self, discovery: Discovery) -> Result<()> {
        let (table, skipped) = discovery.into_parts();
        self.publish(table)?;
        self.skipped.store(Some(Arc::new(skipped)));
        Ok(())
    }

    /// Add a protocol to a published registry.
    pub fn register(&self, descriptor: ProtocolDescriptor) -> Result<()> {
        if !is_valid_protocol_name(descriptor.name()) {
            return Err(BrokerError::InvalidProtocolName {
                name: descriptor.name().to_string(),
                implementation: descriptor.implementation().to_string(),
            });
        }

        let _guard = self.lock();

        let current = self.table.load_full().ok_or(BrokerError::NotPublished)?;
        if let Some(existing) = current.get(descriptor.name()) {
            return Err(BrokerError::DuplicateProtocol {
                name: descriptor.name().to_string(),
                existing: existing.implementation().to_string(),
                replacement: descriptor.implementation().to_string(),
            });
        }

        tracing::info!(
            "Registering protocol '{}' ({})",
            descriptor.name(),
            descriptor.implementation()
        );

        let mut next = (*current).clone();
        next.insert(descriptor.name().to_string(), Arc::new(descriptor));
        self.table.store(Some(Arc::new(next)));
        Ok(())
    }

    /// Find the descriptor for `name`. `None` if unknown or unpublished.
    pub fn lookup(&self, name: &str) -> Option<Arc<ProtocolDescriptor>> {
        let table = self.table.load();
        table.as_deref()?.get(name).cloned()
    }

    /// Check if a protocol is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Registered protocol names, sorted
    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .load()
            .as_deref()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Candidates discovery left out, if this registry came from discovery
    pub fn skipped(&self) -> Vec<SkippedCandidate> {
        self.skipped.load().as_deref().cloned().unwrap_or_default()
    }

    pub fn state(&self) -> RegistryState {
        if self.table.load().is_some() {
            RegistryState::Populated
        } else {
            RegistryState::Uninitialized
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("state", &self.state())
            .field("protocols", &self.protocols())
            .finish()
    }
}

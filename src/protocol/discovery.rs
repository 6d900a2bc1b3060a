//! Protocol discovery.
//!
//! Protocol implementations announce themselves with
//! [`register_protocol!`](crate::register_protocol), which submits a
//! [`ProtocolCandidate`] through `inventory`. Discovery walks those candidates
//! (plus any supplied explicitly), keeps the ones that carry a constructor and
//! a usable name, and produces the table the registry publishes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::ProtocolTable;
use super::{is_valid_protocol_name, BuilderConstructor, ProtocolDescriptor};
use crate::error::{BrokerError, Result};

/// A protocol implementation as declared at compile time.
#[derive(Clone, Copy)]
pub struct ProtocolCandidate {
    name: &'static str,
    implementation: &'static str,
    constructor: Option<BuilderConstructor>,
}

inventory::collect!(ProtocolCandidate);

impl ProtocolCandidate {
    pub const fn new(
        name: &'static str,
        implementation: &'static str,
        constructor: Option<BuilderConstructor>,
    ) -> Self {
        Self {
            name,
            implementation,
            constructor,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn implementation(&self) -> &'static str {
        self.implementation
    }
}

impl std::fmt::Debug for ProtocolCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCandidate")
            .field("name", &self.name)
            .field("implementation", &self.implementation)
            .field("constructor", &self.constructor.is_some())
            .finish()
    }
}

/// What to do when two candidates declare the same protocol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail discovery with [`BrokerError::DuplicateProtocol`]
    #[default]
    Reject,
    /// Keep the candidate seen last and log a warning.
    LastWins,
}

/// Knobs for a discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub duplicate_policy: DuplicatePolicy,

    /// Protocol names to leave out of the registry
    pub disabled: BTreeSet<String>,
}

/// Why a candidate did not make it into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Declared without a builder (usually a disabled cargo feature)
    NoConstructor,
    InvalidName,
    Disabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoConstructor => write!(f, "no connection builder compiled in"),
            SkipReason::InvalidName => write!(f, "invalid protocol name"),
            SkipReason::Disabled => write!(f, "disabled by configuration"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub name: String,
    pub implementation: String,
    pub reason: SkipReason,
}

/// Result of scanning protocol candidates.
#[derive(Debug, Default)]
pub struct Discovery {
    table: ProtocolTable,
    skipped: Vec<SkippedCandidate>,
    options: DiscoveryOptions,
}

impl Discovery {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self {
            table: ProtocolTable::new(),
            skipped: Vec::new(),
            options,
        }
    }

    /// Scan every candidate submitted with `inventory` in this binary.
    pub fn from_inventory(options: DiscoveryOptions) -> Result<Self> {
        Self::new(options).scan(inventory::iter::<ProtocolCandidate>)
    }

    /// Scan the given candidates.
    pub fn scan<'a, I>(mut self, candidates: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ProtocolCandidate>,
    {
        for candidate in candidates {
            self.consider(candidate)?;
        }
        Ok(self)
    }

    /// Consider one explicitly supplied candidate, same rules as [`scan`](Self::scan).
    pub fn with_candidate(mut self, candidate: ProtocolCandidate) -> Result<Self> {
        self.consider(&candidate)?;
        Ok(self)
    }

    /// Add an explicitly registered descriptor, bypassing `inventory`.
    pub fn with_descriptor(mut self, descriptor: ProtocolDescriptor) -> Result<Self> {
        if !is_valid_protocol_name(descriptor.name()) {
            return Err(BrokerError::InvalidProtocolName {
                name: descriptor.name().to_string(),
                implementation: descriptor.implementation().to_string(),
            });
        }
        self.accept(descriptor)?;
        Ok(self)
    }

    fn consider(&mut self, candidate: &ProtocolCandidate) -> Result<()> {
        let reason = if !is_valid_protocol_name(candidate.name) {
            Some(SkipReason::InvalidName)
        } else if self.options.disabled.contains(candidate.name) {
            Some(SkipReason::Disabled)
        } else {
            None
        };

        let constructor = match (reason, candidate.constructor) {
            (None, Some(constructor)) => constructor,
            (reason, _) => {
                let reason = reason.unwrap_or(SkipReason::NoConstructor);
                if reason == SkipReason::Disabled {
                    tracing::info!("Protocol '{}' is disabled, skipping", candidate.name);
                } else {
                    tracing::warn!(
                        "Skipping {} for protocol '{}': {}",
                        candidate.implementation,
                        candidate.name,
                        reason
                    );
                }
                self.skipped.push(SkippedCandidate {
                    name: candidate.name.to_string(),
                    implementation: candidate.implementation.to_string(),
                    reason,
                });
                return Ok(());
            }
        };

        self.accept(ProtocolDescriptor::new(
            candidate.name,
            candidate.implementation,
            constructor,
        ))
    }

    fn accept(&mut self, descriptor: ProtocolDescriptor) -> Result<()> {
        if let Some(existing) = self.table.get(descriptor.name()) {
            match self.options.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(BrokerError::DuplicateProtocol {
                        name: descriptor.name().to_string(),
                        existing: existing.implementation().to_string(),
                        replacement: descriptor.implementation().to_string(),
                    });
                }
                DuplicatePolicy::LastWins => {
                    tracing::warn!(
                        "Protocol '{}' declared by both {} and {}; using {}",
                        descriptor.name(),
                        existing.implementation(),
                        descriptor.implementation(),
                        descriptor.implementation()
                    );
                }
            }
        }

        tracing::debug!(
            "Discovered protocol '{}' ({})",
            descriptor.name(),
            descriptor.implementation()
        );
        self.table
            .insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// Descriptors accepted so far.
    pub fn table(&self) -> &ProtocolTable {
        &self.table
    }

    pub fn skipped(&self) -> &[SkippedCandidate] {
        &self.skipped
    }

    pub fn into_parts(self) -> (ProtocolTable, Vec<SkippedCandidate>) {
        (self.table, self.skipped)
    }
}

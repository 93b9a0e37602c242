//! Provider registry: the single owner of provider descriptors.
//!
//! Descriptor identity and limits are fixed at registration. The two live
//! fields, availability and usage, are atomics that only the credential
//! manager, health probes and the usage refresher write, through the
//! crate-private setters below. Callers outside the crate only ever see
//! snapshot copies.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use strata_common::{Error, Result};
use strata_storage::StorageAdapter;

const GIB: u64 = 1024 * 1024 * 1024;

/// Operation a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
    Delete,
    List,
}

impl Operation {
    /// All operations.
    pub const ALL: [Operation; 4] = [
        Operation::Upload,
        Operation::Download,
        Operation::Delete,
        Operation::List,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Delete => "delete",
            Operation::List => "list",
        };
        f.write_str(name)
    }
}

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Long-lived static keys (e.g. S3 access key pairs).
    StaticCredential,
    /// Short-lived OAuth access tokens renewed with a refresh token.
    OauthRefreshable,
    /// Third-party HTTP storage API registered at runtime.
    DynamicHttp,
}

/// Capability limits of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLimits {
    /// Largest single object the provider accepts.
    pub max_file_size_bytes: u64,
    /// Maximum transfers in flight against the provider.
    pub max_concurrent_transfers: u32,
    /// Supported operations.
    pub supported_ops: BTreeSet<Operation>,
}

impl ProviderLimits {
    /// Limits supporting every operation.
    pub fn new(max_file_size_bytes: u64, max_concurrent_transfers: u32) -> Self {
        Self {
            max_file_size_bytes,
            max_concurrent_transfers,
            supported_ops: Operation::ALL.into_iter().collect(),
        }
    }

    /// Restrict to the given operations.
    pub fn with_ops(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.supported_ops = ops.into_iter().collect();
        self
    }

    /// Check whether an operation is supported.
    pub fn supports(&self, op: Operation) -> bool {
        self.supported_ops.contains(&op)
    }

    /// Default limits of the well-known built-in providers.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "s3" => Some(Self::new(5 * GIB, 100)),
            "googleDrive" => Some(Self::new(5 * GIB, 50)),
            "dropbox" => Some(Self::new(2 * GIB, 20)),
            _ => None,
        }
    }
}

/// Snapshot of one provider's identity, limits and live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub limits: ProviderLimits,
    pub available: bool,
    pub live_usage_bytes: u64,
}

impl ProviderDescriptor {
    /// Describe a new provider. Registration always starts it available with no usage.
    pub fn new(name: impl Into<String>, kind: ProviderKind, limits: ProviderLimits) -> Self {
        Self {
            name: name.into(),
            kind,
            limits,
            available: true,
            live_usage_bytes: 0,
        }
    }

    /// Free headroom used for ranking: max file size minus live usage, floored at zero.
    pub fn headroom(&self) -> u64 {
        self.limits
            .max_file_size_bytes
            .saturating_sub(self.live_usage_bytes)
    }
}

/// Registry-owned record for one provider.
pub(crate) struct ProviderEntry {
    name: String,
    kind: ProviderKind,
    limits: ProviderLimits,
    available: AtomicBool,
    live_usage_bytes: AtomicU64,
    adapter: Arc<dyn StorageAdapter>,
    permits: Arc<Semaphore>,
}

impl ProviderEntry {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn limits(&self) -> &ProviderLimits {
        &self.limits
    }

    pub(crate) fn adapter(&self) -> Arc<dyn StorageAdapter> {
        self.adapter.clone()
    }

    pub(crate) fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    fn snapshot(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            limits: self.limits.clone(),
            available: self.available.load(Ordering::Acquire),
            live_usage_bytes: self.live_usage_bytes.load(Ordering::Acquire),
        }
    }
}

/// Registry of storage providers.
///
/// Iteration order is registration order, which makes selection tie-breaks
/// reproducible.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<Vec<Arc<ProviderEntry>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with its adapter.
    ///
    /// The descriptor's `available` and `live_usage_bytes` are ignored: a new
    /// provider starts available with zero usage.
    ///
    /// # Errors
    /// - `DuplicateProvider` if the name is taken
    /// - `InvalidInput` for an empty name or a zero concurrency limit
    pub fn register(
        &self,
        descriptor: ProviderDescriptor,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::InvalidInput("Provider name cannot be empty".to_string()));
        }
        if descriptor.limits.max_concurrent_transfers == 0 {
            return Err(Error::InvalidInput(format!(
                "Provider '{}' must allow at least one concurrent transfer",
                descriptor.name
            )));
        }

        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name == descriptor.name) {
            return Err(Error::DuplicateProvider(descriptor.name));
        }

        let permits = Arc::new(Semaphore::new(descriptor.limits.max_concurrent_transfers as usize));
        info!(
            "Registered provider '{}' ({:?}, backend {})",
            descriptor.name,
            descriptor.kind,
            adapter.backend()
        );
        entries.push(Arc::new(ProviderEntry {
            name: descriptor.name,
            kind: descriptor.kind,
            limits: descriptor.limits,
            available: AtomicBool::new(true),
            live_usage_bytes: AtomicU64::new(0),
            adapter,
            permits,
        }));
        Ok(())
    }

    /// Remove a provider.
    ///
    /// Transfers already holding the provider's entry run to completion;
    /// later lookups no longer find it.
    ///
    /// # Errors
    /// - `UnknownProvider` if the name is not registered
    pub fn deregister(&self, name: &str) -> Result<ProviderDescriptor> {
        let mut entries = self.entries.write();
        let index = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        let entry = entries.remove(index);
        info!("Deregistered provider '{}'", name);
        Ok(entry.snapshot())
    }

    /// Snapshot of every descriptor, in registration order.
    pub fn list(&self) -> Vec<ProviderDescriptor> {
        self.entries.read().iter().map(|e| e.snapshot()).collect()
    }

    /// Snapshot of one descriptor.
    pub fn get(&self, name: &str) -> Option<ProviderDescriptor> {
        self.entry(name).map(|e| e.snapshot())
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Check if a provider is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| e.name == name)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.entries.read().iter().find(|e| e.name == name).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        self.entries.read().clone()
    }

    /// Set availability. No-op for unknown names.
    ///
    /// Returns `true` if the flag changed.
    pub(crate) fn set_availability(&self, name: &str, available: bool) -> bool {
        match self.entry(name) {
            Some(entry) => {
                let previous = entry.available.swap(available, Ordering::AcqRel);
                if previous != available {
                    debug!("Provider '{}' availability: {} -> {}", name, previous, available);
                }
                previous != available
            }
            None => false,
        }
    }

    /// Record refreshed usage. No-op for unknown names.
    pub(crate) fn update_usage(&self, name: &str, bytes: u64) {
        if let Some(entry) = self.entry(name) {
            entry.live_usage_bytes.store(bytes, Ordering::Release);
        }
    }
}

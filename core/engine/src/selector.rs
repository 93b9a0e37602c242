//! Provider selection for uploads.
//!
//! Selection is deterministic: the same registry snapshot and request always
//! yield the same provider. Candidates are ranked by headroom, ties going to
//! the earliest candidate.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use strata_common::{Error, ObjectKey, OwnerId, Result};

use crate::credentials::CredentialManager;
use crate::registry::{Operation, ProviderDescriptor, ProviderRegistry};

/// An upload request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    owner_id: OwnerId,
    object_key: ObjectKey,
    size_bytes: u64,
    preferred_providers: Vec<String>,
}

impl TransferRequest {
    /// Create a request with no provider preference.
    pub fn new(owner_id: OwnerId, object_key: ObjectKey, size_bytes: u64) -> Self {
        Self {
            owner_id,
            object_key,
            size_bytes,
            preferred_providers: Vec::new(),
        }
    }

    /// Restrict selection to these providers, tried in this order of preference.
    pub fn with_preferred<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn object_key(&self) -> &ObjectKey {
        &self.object_key
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn preferred_providers(&self) -> &[String] {
        &self.preferred_providers
    }
}

/// Candidate list for a request: preferred providers that are registered, in
/// caller order with duplicates collapsed, or every provider in registry order.
/// Unavailable, too-small and upload-incapable providers are dropped.
pub fn eligible_candidates(
    snapshot: &[ProviderDescriptor],
    request: &TransferRequest,
) -> Vec<ProviderDescriptor> {
    let ordered: Vec<&ProviderDescriptor> = if request.preferred_providers.is_empty() {
        snapshot.iter().collect()
    } else {
        let mut seen = HashSet::new();
        request
            .preferred_providers
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| snapshot.iter().find(|d| &d.name == name))
            .collect()
    };

    ordered
        .into_iter()
        .filter(|d| d.available)
        .filter(|d| d.limits.max_file_size_bytes >= request.size_bytes)
        .filter(|d| d.limits.supports(Operation::Upload))
        .cloned()
        .collect()
}

/// Candidate with the most headroom; the earliest wins a tie.
pub fn pick_by_headroom(candidates: &[ProviderDescriptor]) -> Option<&ProviderDescriptor> {
    let mut best: Option<&ProviderDescriptor> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.headroom() <= current.headroom() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Picks the provider for each upload.
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialManager>,
}

impl ProviderSelector {
    /// Create a new selector.
    pub fn new(registry: Arc<ProviderRegistry>, credentials: Arc<CredentialManager>) -> Self {
        Self { registry, credentials }
    }

    /// Select a provider for `request`.
    ///
    /// Candidates whose credentials cannot be made fresh are skipped; the
    /// credential manager marks them unavailable.
    ///
    /// # Errors
    /// - `NoProviderAvailable` if no candidate survives
    pub async fn select(&self, request: &TransferRequest) -> Result<String> {
        let candidates = eligible_candidates(&self.registry.list(), request);

        let mut fresh = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.credentials.ensure_fresh(&candidate.name).await {
                Ok(()) => fresh.push(candidate),
                Err(e) => debug!("Skipping '{}' for selection: {}", candidate.name, e),
            }
        }

        let chosen = pick_by_headroom(&fresh).ok_or(Error::NoProviderAvailable {
            size_bytes: request.size_bytes,
        })?;
        debug!(
            "Selected '{}' for '{}' ({} bytes, headroom {})",
            chosen.name,
            request.object_key,
            request.size_bytes,
            chosen.headroom()
        );
        Ok(chosen.name.clone())
    }
}

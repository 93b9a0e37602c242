//! Credential lifecycle: expiry-checked, coalesced credential refresh.
//!
//! Static-credential and dynamic-http providers are always fresh. OAuth
//! providers keep a cached access token per provider; when it is missing or
//! inside the refresh skew, exactly one caller runs the refresh flow while
//! concurrent callers wait for and adopt its result.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use strata_common::{Error, Result, SecretString};

use crate::events::{EngineEvent, EventReporter};
use crate::registry::{ProviderKind, ProviderRegistry};

/// A short-lived access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Bearer token.
    pub token: SecretString,
    /// Expiry, if the identity provider reported one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Check if the token is still usable for at least `skew`.
    pub fn is_fresh(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > Utc::now() + skew,
            None => true,
        }
    }
}

/// Credential handed out by a credential source.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Long-lived key pair.
    Keys {
        access_key_id: String,
        secret_access_key: SecretString,
    },
    /// OAuth access token.
    Token(AccessToken),
}

/// External supplier of per-provider credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential for a provider, without contacting the identity provider.
    async fn get_credential(&self, provider: &str) -> Result<Credential>;

    /// Run the refresh flow and return a new access token.
    async fn refresh_credential(&self, provider: &str) -> Result<AccessToken>;
}

/// Credential source for deployments with no OAuth providers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialSource for NoCredentials {
    async fn get_credential(&self, provider: &str) -> Result<Credential> {
        Err(Error::Authentication(format!(
            "No credentials configured for '{}'",
            provider
        )))
    }

    async fn refresh_credential(&self, provider: &str) -> Result<AccessToken> {
        Err(Error::Authentication(format!(
            "No refresh flow configured for '{}'",
            provider
        )))
    }
}

#[derive(Default)]
struct TokenState {
    token: Option<AccessToken>,
    last_failure: Option<String>,
}

/// Per-provider refresh slot. `generation` increments after every refresh
/// attempt so waiters can tell whether one completed while they queued.
#[derive(Default)]
struct TokenCell {
    generation: AtomicU64,
    state: tokio::sync::Mutex<TokenState>,
}

/// Keeps provider credentials fresh and provider availability in step with them.
pub struct CredentialManager {
    registry: Arc<ProviderRegistry>,
    source: Arc<dyn CredentialSource>,
    reporter: EventReporter,
    skew: Duration,
    cells: Mutex<HashMap<String, Arc<TokenCell>>>,
}

impl CredentialManager {
    /// Create a new credential manager.
    ///
    /// `skew` is how long before expiry a token already counts as expired.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        source: Arc<dyn CredentialSource>,
        reporter: EventReporter,
        skew: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            reporter,
            skew,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, provider: &str) -> Arc<TokenCell> {
        self.cells
            .lock()
            .entry(provider.to_string())
            .or_default()
            .clone()
    }

    fn set_availability(&self, provider: &str, available: bool) {
        if self.registry.set_availability(provider, available) {
            self.reporter.report(EngineEvent::AvailabilityChanged {
                name: provider.to_string(),
                available,
            });
        }
    }

    /// Make sure the provider's credentials are usable.
    ///
    /// # Postconditions
    /// - On success the provider holds a fresh token and is marked available
    /// - On refresh failure the provider is marked unavailable
    ///
    /// A provider marked unavailable here is skipped by selection, so selection
    /// alone never retries it. It comes back after a successful `probe` or a
    /// direct call to this method.
    ///
    /// # Errors
    /// - `UnknownProvider` if the provider is not registered
    /// - `CredentialRefresh` if the refresh flow failed (now or in a refresh
    ///   this call waited on)
    pub async fn ensure_fresh(&self, provider: &str) -> Result<()> {
        let descriptor = self
            .registry
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;

        if descriptor.kind != ProviderKind::OauthRefreshable {
            return Ok(());
        }

        let cell = self.cell(provider);
        let observed = cell.generation.load(Ordering::Acquire);
        let mut state = cell.state.lock().await;

        if state.token.as_ref().is_some_and(|t| t.is_fresh(self.skew)) {
            return Ok(());
        }

        // A refresh finished while we queued for the lock: adopt its result.
        if cell.generation.load(Ordering::Acquire) != observed {
            return match &state.last_failure {
                Some(reason) => Err(Error::CredentialRefresh {
                    provider: provider.to_string(),
                    reason: reason.clone(),
                }),
                None => Ok(()),
            };
        }

        if state.token.is_none() && state.last_failure.is_none() {
            match self.source.get_credential(provider).await {
                Ok(Credential::Token(token)) if token.is_fresh(self.skew) => {
                    debug!("Using stored access token for '{}'", provider);
                    state.token = Some(token);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => debug!("No stored credential for '{}': {}", provider, e),
            }
        }

        info!("Refreshing access token for '{}'", provider);
        let result = self.source.refresh_credential(provider).await;
        cell.generation.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(token) => {
                state.token = Some(token);
                state.last_failure = None;
                drop(state);
                self.set_availability(provider, true);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Credential refresh failed for '{}': {}", provider, reason);
                state.token = None;
                state.last_failure = Some(reason.clone());
                drop(state);
                self.set_availability(provider, false);
                Err(Error::CredentialRefresh {
                    provider: provider.to_string(),
                    reason,
                })
            }
        }
    }

    /// Cached access token for a provider, if one is held.
    ///
    /// The built-in adapters authenticate with their own configuration; this is
    /// for callers that wire a token-based adapter of their own.
    pub async fn access_token(&self, provider: &str) -> Option<SecretString> {
        let cell = self.cells.lock().get(provider).cloned()?;
        let state = cell.state.lock().await;
        state.token.as_ref().map(|t| t.token.clone())
    }

    /// Drop cached state for a provider (after deregistration).
    pub fn forget(&self, provider: &str) {
        self.cells.lock().remove(provider);
    }
}

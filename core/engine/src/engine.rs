//! Storage engine facade tying registry, credentials, selection, transfers,
//! migration and telemetry together.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use strata_common::{Error, ObjectKey, OwnerId, Result, SecretString};
use strata_storage::{
    stream_from_bytes, AdapterFactories, ByteStream, HttpAdapter, HttpAdapterConfig, StorageAdapter,
};

use crate::analysis::{analyze, EfficiencyReport};
use crate::config::{EngineConfig, StrataConfig};
use crate::credentials::{CredentialManager, CredentialSource};
use crate::events::{EngineEvent, EventReporter, TelemetrySink};
use crate::executor::{TransferExecutor, TransferOutcome};
use crate::migration::{MigrationCoordinator, MigrationPlan};
use crate::registry::{ProviderDescriptor, ProviderKind, ProviderLimits, ProviderRegistry};
use crate::selector::{ProviderSelector, TransferRequest};
use crate::usage::{refresh_usage, UsageRefreshHandle};

/// Where an upload went and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub provider: String,
    pub outcome: TransferOutcome,
}

/// Multi-provider storage engine.
///
/// Safe to share between tasks behind an `Arc`.
pub struct StorageEngine {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialManager>,
    selector: Arc<ProviderSelector>,
    executor: Arc<TransferExecutor>,
    migrations: MigrationCoordinator,
    reporter: EventReporter,
}

impl StorageEngine {
    /// Create an engine with no providers.
    ///
    /// Must be called inside a tokio runtime: the event reporter's delivery
    /// task is spawned here.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn CredentialSource>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let reporter = EventReporter::spawn(sink, config.event_queue_capacity);
        let registry = Arc::new(ProviderRegistry::new());
        let credentials = Arc::new(CredentialManager::new(
            registry.clone(),
            source,
            reporter.clone(),
            config.credential_refresh_skew(),
        ));
        let selector = Arc::new(ProviderSelector::new(registry.clone(), credentials.clone()));
        let executor = Arc::new(TransferExecutor::new(
            registry.clone(),
            reporter.clone(),
            config.backpressure,
        ));
        let migrations = MigrationCoordinator::new(
            registry.clone(),
            selector.clone(),
            executor.clone(),
            reporter.clone(),
        );

        Self {
            config,
            registry,
            credentials,
            selector,
            executor,
            migrations,
            reporter,
        }
    }

    /// Build an engine and register every configured provider.
    ///
    /// # Errors
    /// - Invalid credential settings
    /// - A provider's backend cannot be built or its limits are unknown
    /// - Duplicate provider names
    pub fn from_config(
        config: &StrataConfig,
        factories: &AdapterFactories,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let source = Arc::new(config.credential_source()?);
        let engine = Self::new(config.engine.clone(), source, sink);

        for provider in &config.providers {
            let adapter = factories.create(&provider.backend, provider.backend_config.clone())?;
            engine.register_provider(provider.descriptor()?, adapter)?;
        }

        info!("Engine ready with {} providers", engine.registry.len());
        Ok(engine)
    }

    /// Register a provider.
    ///
    /// # Errors
    /// - `DuplicateProvider` if the name is taken
    pub fn register_provider(
        &self,
        descriptor: ProviderDescriptor,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        let kind = descriptor.kind;
        self.registry.register(descriptor, adapter)?;
        self.reporter
            .report(EngineEvent::ProviderRegistered { name, kind });
        Ok(())
    }

    /// Register a third-party HTTP storage API at runtime.
    ///
    /// The API is probed first; an unreachable API is not registered.
    ///
    /// # Errors
    /// - `DuplicateProvider` if the name is taken
    /// - `InvalidInput` for a bad API URL
    /// - The probe's error if the API does not answer its status endpoint
    pub async fn register_http_provider(
        &self,
        name: &str,
        api_url: &str,
        api_key: Option<SecretString>,
        limits: ProviderLimits,
    ) -> Result<()> {
        if self.registry.contains(name) {
            return Err(Error::DuplicateProvider(name.to_string()));
        }

        let adapter = HttpAdapter::new(HttpAdapterConfig {
            api_url: api_url.to_string(),
            api_key,
            timeout_secs: 30,
        })?;
        if let Err(e) = adapter.health_check().await {
            warn!("Refusing to register '{}': probe of {} failed: {}", name, api_url, e);
            return Err(e);
        }

        self.register_provider(
            ProviderDescriptor::new(name, ProviderKind::DynamicHttp, limits),
            Arc::new(adapter),
        )
    }

    /// Remove a provider. In-flight transfers against it run to completion.
    ///
    /// # Errors
    /// - `UnknownProvider` if the name is not registered
    pub fn deregister_provider(&self, name: &str) -> Result<ProviderDescriptor> {
        let removed = self.registry.deregister(name)?;
        self.credentials.forget(name);
        self.reporter.report(EngineEvent::ProviderDeregistered {
            name: name.to_string(),
        });
        Ok(removed)
    }

    /// Snapshot of every provider, in registration order.
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.list()
    }

    /// Upload to the provider chosen by the selector.
    ///
    /// An adapter failure is reported in the receipt's outcome.
    ///
    /// # Errors
    /// - `NoProviderAvailable` if no provider can take the object
    /// - Executor precondition errors (e.g. `ProviderBusy` in reject mode)
    pub async fn upload(
        &self,
        request: TransferRequest,
        stream: ByteStream,
    ) -> Result<UploadReceipt> {
        let provider = self.selector.select(&request).await?;
        self.reporter.report(EngineEvent::Selection {
            owner_id: request.owner_id().to_string(),
            object_key: request.object_key().to_string(),
            size_bytes: request.size_bytes(),
            provider: provider.clone(),
        });

        let outcome = self
            .executor
            .upload(&provider, request.object_key(), stream, request.size_bytes())
            .await?;
        Ok(UploadReceipt { provider, outcome })
    }

    /// Download an object from a provider.
    ///
    /// # Errors
    /// - Executor precondition errors
    /// - `Transfer` carrying the adapter failure
    pub async fn download(&self, provider: &str, key: &ObjectKey) -> Result<ByteStream> {
        let download = self.executor.download(provider, key).await?;
        if let Some(e) = download.outcome.to_error() {
            return Err(e);
        }
        Ok(stream_from_bytes(download.data.unwrap_or_default()))
    }

    /// Delete an object from a provider.
    pub async fn delete(&self, provider: &str, key: &ObjectKey) -> Result<TransferOutcome> {
        self.executor.delete(provider, key).await
    }

    /// Move an object off `source_provider`.
    pub async fn migrate(&self, key: &ObjectKey, source_provider: &str) -> Result<MigrationPlan> {
        self.migrations.migrate(key, source_provider).await
    }

    /// Run a provider's health check and record the result as availability.
    ///
    /// # Errors
    /// - `UnknownProvider` if the name is not registered
    pub async fn probe(&self, name: &str) -> Result<bool> {
        let entry = self
            .registry
            .entry(name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;

        let healthy = match entry.adapter().health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Health probe of '{}' failed: {}", name, e);
                false
            }
        };
        if self.registry.set_availability(name, healthy) {
            self.reporter.report(EngineEvent::AvailabilityChanged {
                name: name.to_string(),
                available: healthy,
            });
        }
        Ok(healthy)
    }

    /// Refresh every provider's live usage once.
    pub async fn refresh_usage(&self) -> usize {
        refresh_usage(&self.registry).await
    }

    /// Start refreshing usage on the configured interval.
    pub fn spawn_usage_refresh(&self) -> UsageRefreshHandle {
        UsageRefreshHandle::spawn(self.registry.clone(), self.config.usage_refresh_interval())
    }

    /// Classify providers by utilization and report the result.
    pub fn analyze_efficiency(&self) -> EfficiencyReport {
        let report = analyze(&self.registry.list(), self.config.efficiency);
        debug!(
            "Efficiency: {} underutilized, {} overutilized",
            report.underutilized.len(),
            report.overutilized.len()
        );
        self.reporter.report(EngineEvent::EfficiencyAnalysis {
            report: report.clone(),
        });
        report
    }

    /// Filter an owner's provider preferences down to registered providers,
    /// keeping their order.
    ///
    /// # Errors
    /// - `NoProviderAvailable` if none of them is registered
    pub fn resolve_preferences(
        &self,
        owner_id: &OwnerId,
        providers: &[String],
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let resolved: Vec<String> = providers
            .iter()
            .filter(|name| self.registry.contains(name))
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect();

        if resolved.is_empty() {
            return Err(Error::NoProviderAvailable { size_bytes: 0 });
        }
        debug!("Resolved preferences for '{}': {:?}", owner_id, resolved);
        Ok(resolved)
    }

    /// Events dropped by the reporter so far.
    pub fn dropped_events(&self) -> u64 {
        self.reporter.dropped_events()
    }

    /// Wait until every event reported so far has been handled by the sink.
    pub async fn flush_events(&self) {
        self.reporter.flush().await;
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

//! Strata storage engine
//!
//! This module places objects across multiple storage providers, including:
//! - A provider registry with capability limits and live availability/usage
//! - Expiry-checked, coalesced credential refresh
//! - Deterministic headroom-ranked provider selection
//! - Transfers bounded by per-provider concurrency limits
//! - Verified migration between providers
//! - Non-blocking event reporting to a telemetry sink
//! - Usage refresh and efficiency analysis

pub mod analysis;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod events;
pub mod executor;
pub mod migration;
pub mod oauth;
pub mod registry;
pub mod selector;
pub mod usage;

#[cfg(test)]
mod testing;

// Re-export main types
pub use analysis::{
    analyze, EfficiencyReport, EfficiencyThresholds, ProviderUtilization, RebalanceSuggestion,
};
pub use config::{EngineConfig, ProviderConfig, StrataConfig};
pub use credentials::{AccessToken, Credential, CredentialManager, CredentialSource, NoCredentials};
pub use engine::{StorageEngine, UploadReceipt};
pub use events::{
    EngineEvent, EventRecord, EventReporter, HttpTelemetrySink, TelemetrySink, TracingSink,
};
pub use executor::{BackpressureMode, Download, TransferExecutor, TransferOutcome};
pub use migration::{MigrationCoordinator, MigrationPlan, MigrationState};
pub use oauth::{OAuthClientSettings, OAuthCredentialSource, StaticKeys};
pub use registry::{Operation, ProviderDescriptor, ProviderKind, ProviderLimits, ProviderRegistry};
pub use selector::{ProviderSelector, TransferRequest};
pub use usage::{refresh_usage, UsageRefreshHandle};

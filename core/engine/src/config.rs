//! Engine and provider configuration.
//!
//! Configuration is a single JSON document:
//!
//! ```json
//! {
//!   "engine": { "backpressure": "reject", "usageRefreshIntervalSecs": 60 },
//!   "telemetryEndpoint": "https://telemetry.example.com/events",
//!   "providers": [
//!     { "name": "s3", "kind": "static-credential", "backend": "local",
//!       "backendConfig": { "root": "/srv/strata/s3" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use strata_common::{Error, Result};

use crate::analysis::EfficiencyThresholds;
use crate::executor::BackpressureMode;
use crate::oauth::{OAuthClientSettings, OAuthCredentialSource, StaticKeys};
use crate::registry::{ProviderDescriptor, ProviderKind, ProviderLimits};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Behaviour when a provider is at its transfer limit.
    pub backpressure: BackpressureMode,
    /// Bounded capacity of the event queue.
    pub event_queue_capacity: usize,
    pub usage_refresh_interval_secs: u64,
    /// How long before expiry an access token is refreshed.
    pub credential_refresh_skew_secs: u64,
    pub efficiency: EfficiencyThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backpressure: BackpressureMode::Block,
            event_queue_capacity: 1024,
            usage_refresh_interval_secs: 300,
            credential_refresh_skew_secs: 300,
            efficiency: EfficiencyThresholds::default(),
        }
    }
}

impl EngineConfig {
    pub fn usage_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.usage_refresh_interval_secs.max(1))
    }

    pub fn credential_refresh_skew(&self) -> chrono::Duration {
        let secs = i64::try_from(self.credential_refresh_skew_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs)
    }
}

/// One configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Omit to use the built-in limits for well-known provider names.
    #[serde(default)]
    pub limits: Option<ProviderLimits>,
    /// Adapter factory name ("memory", "local", "http").
    pub backend: String,
    #[serde(default)]
    pub backend_config: Value,
    #[serde(default)]
    pub oauth: Option<OAuthClientSettings>,
    #[serde(default)]
    pub keys: Option<StaticKeys>,
}

impl ProviderConfig {
    /// Configured limits, falling back to the built-in table.
    ///
    /// # Errors
    /// - `InvalidInput` if neither is available
    pub fn resolved_limits(&self) -> Result<ProviderLimits> {
        self.limits
            .clone()
            .or_else(|| ProviderLimits::builtin(&self.name))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Provider '{}' has no limits and is not a built-in provider",
                    self.name
                ))
            })
    }

    pub fn descriptor(&self) -> Result<ProviderDescriptor> {
        Ok(ProviderDescriptor::new(
            self.name.clone(),
            self.kind,
            self.resolved_limits()?,
        ))
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrataConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// POST events here instead of logging them.
    #[serde(default)]
    pub telemetry_endpoint: Option<String>,
}

impl StrataConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the credential source for the configured providers.
    ///
    /// # Errors
    /// - An OAuth token URL is invalid
    pub fn credential_source(&self) -> Result<OAuthCredentialSource> {
        let source = OAuthCredentialSource::new()?;
        for provider in &self.providers {
            if let Some(oauth) = &provider.oauth {
                source.add_oauth(provider.name.clone(), oauth.clone())?;
            }
            if let Some(keys) = &provider.keys {
                source.add_keys(provider.name.clone(), keys.clone());
            }
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Operation;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backpressure, BackpressureMode::Block);
        assert_eq!(config.usage_refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.credential_refresh_skew(), chrono::Duration::minutes(5));
        assert_eq!(config.efficiency.under_utilized, 0.2);
    }

    #[test]
    fn test_parse_full_config() {
        let config = StrataConfig::from_json(
            r#"{
                "engine": { "backpressure": "reject", "eventQueueCapacity": 16 },
                "telemetryEndpoint": "http://localhost:9000/events",
                "providers": [
                    { "name": "s3", "kind": "static-credential", "backend": "memory",
                      "keys": { "accessKeyId": "AKIA", "secretAccessKey": "shh" } },
                    { "name": "googleDrive", "kind": "oauth-refreshable", "backend": "memory",
                      "oauth": { "clientId": "id", "tokenUrl": "https://oauth2.example.com/token",
                                 "refreshToken": "r" } },
                    { "name": "archive", "kind": "dynamic-http", "backend": "http",
                      "backendConfig": { "apiUrl": "https://archive.example.com" },
                      "limits": { "maxFileSizeBytes": 1000, "maxConcurrentTransfers": 2,
                                  "supportedOps": ["upload", "download"] } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.engine.backpressure, BackpressureMode::Reject);
        assert_eq!(config.engine.event_queue_capacity, 16);
        assert_eq!(config.engine.usage_refresh_interval_secs, 300);
        assert_eq!(config.providers.len(), 3);

        let s3 = config.providers[0].resolved_limits().unwrap();
        assert_eq!(s3.max_concurrent_transfers, 100);

        let archive = config.providers[2].descriptor().unwrap();
        assert_eq!(archive.kind, ProviderKind::DynamicHttp);
        assert!(!archive.limits.supports(Operation::Delete));

        assert!(config.credential_source().is_ok());
    }

    #[test]
    fn test_unknown_provider_without_limits_is_rejected() {
        let config = StrataConfig::from_json(
            r#"{ "providers": [
                { "name": "mystery", "kind": "static-credential", "backend": "memory" }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(
            config.providers[0].resolved_limits(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{ "engine": { "usageRefreshIntervalSecs": 30 } }"#).unwrap();

        let config = StrataConfig::load(&path).unwrap();
        assert_eq!(config.engine.usage_refresh_interval(), Duration::from_secs(30));
        assert!(config.providers.is_empty());

        assert!(StrataConfig::load(dir.path().join("missing.json")).is_err());
    }
}

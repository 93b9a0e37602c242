//! Migration of a stored object from one provider to another.
//!
//! State machine:
//!
//! ```text
//! planned -> copying -> verifying -> deleting-source -> completed
//!               |           |
//!               v           +-> rolled-back   (target copy removed)
//!             failed        +-> failed        (target copy could not be removed)
//! ```
//!
//! The source copy is deleted only after the target copy has been verified,
//! so at every step the object exists on at least one side.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use strata_common::{Error, ErrorKind, ObjectKey, OwnerId, Result};
use strata_storage::{crc32_hex, stream_from_bytes, ObjectInfo};

use crate::events::{EngineEvent, EventReporter};
use crate::executor::TransferExecutor;
use crate::registry::ProviderRegistry;
use crate::selector::{ProviderSelector, TransferRequest};

/// Owner recorded on selection requests issued by migrations.
const MIGRATION_OWNER: &str = "system";

/// Migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Planned,
    Copying,
    Verifying,
    DeletingSource,
    Completed,
    RolledBack,
    Failed,
}

impl MigrationState {
    /// Check if no further transition can follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::RolledBack | MigrationState::Failed
        )
    }
}

/// A migration and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub object_key: ObjectKey,
    pub source_provider: String,
    pub target_provider: String,
    pub size_bytes: u64,
    pub state: MigrationState,
    /// Why the migration failed, rolled back, or completed with a leftover source copy.
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl MigrationPlan {
    fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
    }
}

/// Moves objects between providers.
pub struct MigrationCoordinator {
    registry: Arc<ProviderRegistry>,
    selector: Arc<ProviderSelector>,
    executor: Arc<TransferExecutor>,
    reporter: EventReporter,
}

impl MigrationCoordinator {
    /// Create a new coordinator.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        selector: Arc<ProviderSelector>,
        executor: Arc<TransferExecutor>,
        reporter: EventReporter,
    ) -> Self {
        Self {
            registry,
            selector,
            executor,
            reporter,
        }
    }

    fn transition(&self, plan: &mut MigrationPlan, state: MigrationState) {
        plan.state = state;
        self.reporter.report(EngineEvent::Migration {
            object_key: plan.object_key.to_string(),
            source_provider: plan.source_provider.clone(),
            target_provider: plan.target_provider.clone(),
            state,
            error_kind: plan.error_kind,
        });
    }

    fn fail(&self, plan: &mut MigrationPlan, error: &Error) {
        warn!(
            "Migration of '{}' from '{}' to '{}' failed: {}",
            plan.object_key, plan.source_provider, plan.target_provider, error
        );
        plan.record_error(error.kind(), error.to_string());
        self.transition(plan, MigrationState::Failed);
    }

    /// Move `object_key` off `source_provider` onto the best other provider.
    ///
    /// Failures after a target has been chosen are not errors: they end the
    /// returned plan in `failed` or `rolled-back`.
    ///
    /// # Errors
    /// - `UnknownProvider` if the source is not registered
    /// - `Transfer` if the object cannot be described at the source
    /// - `NoAlternativeProvider` if no other provider can take the object
    pub async fn migrate(
        &self,
        object_key: &ObjectKey,
        source_provider: &str,
    ) -> Result<MigrationPlan> {
        if !self.registry.contains(source_provider) {
            return Err(Error::UnknownProvider(source_provider.to_string()));
        }

        let source_info = self.executor.stat(source_provider, object_key).await?;

        let no_alternative = || Error::NoAlternativeProvider {
            object_key: object_key.to_string(),
            source_provider: source_provider.to_string(),
        };
        let alternatives: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| name != source_provider)
            .collect();
        if alternatives.is_empty() {
            return Err(no_alternative());
        }

        let request = TransferRequest::new(
            OwnerId::new(MIGRATION_OWNER)?,
            object_key.clone(),
            source_info.size_bytes,
        )
        .with_preferred(alternatives);
        let target_provider = self.selector.select(&request).await.map_err(|e| {
            warn!("No migration target for '{}': {}", object_key, e);
            no_alternative()
        })?;

        let mut plan = MigrationPlan {
            object_key: object_key.clone(),
            source_provider: source_provider.to_string(),
            target_provider,
            size_bytes: source_info.size_bytes,
            state: MigrationState::Planned,
            error_kind: None,
            error_message: None,
        };
        info!(
            "Migrating '{}' ({} bytes) from '{}' to '{}'",
            plan.object_key, plan.size_bytes, plan.source_provider, plan.target_provider
        );
        self.transition(&mut plan, MigrationState::Planned);

        self.transition(&mut plan, MigrationState::Copying);
        let data = match self.copy(&plan, &source_info).await {
            Ok(data) => data,
            Err(e) => {
                self.fail(&mut plan, &e);
                return Ok(plan);
            }
        };

        self.transition(&mut plan, MigrationState::Verifying);
        if let Err(reason) = self.verify(&plan, &source_info, &data).await {
            warn!(
                "Verification of '{}' at '{}' failed: {}",
                plan.object_key, plan.target_provider, reason
            );
            let rollback = self.executor.delete(&plan.target_provider, object_key).await;
            match rollback.map(|outcome| outcome.to_error()) {
                Ok(None) => {
                    plan.record_error(reason.kind(), reason.to_string());
                    self.transition(&mut plan, MigrationState::RolledBack);
                }
                Ok(Some(e)) | Err(e) => self.fail(&mut plan, &e),
            }
            return Ok(plan);
        }

        self.transition(&mut plan, MigrationState::DeletingSource);
        let cleanup = self.executor.delete(&plan.source_provider, object_key).await;
        if let Some(e) = cleanup.map_or_else(Some, |outcome| outcome.to_error()) {
            warn!(
                "Migrated '{}' but could not delete it from '{}': {}",
                plan.object_key, plan.source_provider, e
            );
            plan.record_error(ErrorKind::SourceCleanupFailed, e.to_string());
        }
        self.transition(&mut plan, MigrationState::Completed);
        Ok(plan)
    }

    /// Download from the source and upload to the target.
    ///
    /// A download that does not match the size the source reported is never
    /// uploaded.
    async fn copy(&self, plan: &MigrationPlan, source: &ObjectInfo) -> Result<Vec<u8>> {
        let download = self
            .executor
            .download(&plan.source_provider, &plan.object_key)
            .await?;
        if let Some(e) = download.outcome.to_error() {
            return Err(e);
        }
        let data = download.data.unwrap_or_default();

        let size_bytes = data.len() as u64;
        if size_bytes != source.size_bytes {
            return Err(Error::Verification(format!(
                "read {} bytes from '{}', expected {}",
                size_bytes, plan.source_provider, source.size_bytes
            )));
        }

        let outcome = self
            .executor
            .upload(
                &plan.target_provider,
                &plan.object_key,
                stream_from_bytes(data.clone()),
                size_bytes,
            )
            .await?;
        match outcome.to_error() {
            Some(e) => Err(e),
            None => Ok(data),
        }
    }

    /// Confirm the target holds what the source reported.
    ///
    /// Sizes must match. When the target reports a checksum it must match the
    /// source's, or the CRC32 of the copied bytes if the source reports none.
    async fn verify(&self, plan: &MigrationPlan, source: &ObjectInfo, data: &[u8]) -> Result<()> {
        let target = self
            .executor
            .stat(&plan.target_provider, &plan.object_key)
            .await
            .map_err(|e| Error::Verification(format!("target stat failed: {}", e)))?;

        if target.size_bytes != source.size_bytes {
            return Err(Error::Verification(format!(
                "target holds {} bytes, source holds {}",
                target.size_bytes, source.size_bytes
            )));
        }

        if let Some(checksum) = &target.checksum {
            let expected = source.checksum.clone().unwrap_or_else(|| crc32_hex(data));
            if *checksum != expected {
                return Err(Error::Verification(format!(
                    "target checksum {} does not match {}",
                    checksum, expected
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialManager;
    use crate::executor::BackpressureMode;
    use crate::registry::{ProviderDescriptor, ProviderKind, ProviderLimits};
    use crate::testing::{
        collecting_reporter, CollectingSink, CountingSource, FaultyAdapter, GatedAdapter,
    };
    use chrono::Duration;
    use strata_storage::StorageAdapter;

    struct Harness {
        coordinator: MigrationCoordinator,
        reporter: EventReporter,
        sink: Arc<CollectingSink>,
    }

    fn harness(providers: Vec<(&str, u64, FaultyAdapter)>) -> Harness {
        harness_with(
            providers
                .into_iter()
                .map(|(name, max, adapter)| {
                    (name, max, Arc::new(adapter) as Arc<dyn StorageAdapter>)
                })
                .collect(),
        )
    }

    fn harness_with(providers: Vec<(&str, u64, Arc<dyn StorageAdapter>)>) -> Harness {
        let registry = Arc::new(ProviderRegistry::new());
        for (name, max, adapter) in providers {
            let limits = ProviderLimits::new(max, 4);
            registry
                .register(
                    ProviderDescriptor::new(name, ProviderKind::StaticCredential, limits),
                    adapter,
                )
                .unwrap();
        }
        let (reporter, sink) = collecting_reporter();
        let credentials = Arc::new(CredentialManager::new(
            registry.clone(),
            Arc::new(CountingSource::ok()),
            reporter.clone(),
            Duration::minutes(5),
        ));
        let selector = Arc::new(ProviderSelector::new(registry.clone(), credentials));
        let executor = Arc::new(TransferExecutor::new(
            registry.clone(),
            reporter.clone(),
            BackpressureMode::Block,
        ));
        Harness {
            coordinator: MigrationCoordinator::new(registry, selector, executor, reporter.clone()),
            reporter,
            sink,
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("reports/q3.pdf").unwrap()
    }

    async fn seeded(data: &[u8]) -> FaultyAdapter {
        let adapter = FaultyAdapter::new();
        adapter
            .upload(&key(), stream_from_bytes(data.to_vec()), data.len() as u64)
            .await
            .unwrap();
        adapter
    }

    async fn states(h: &Harness) -> Vec<MigrationState> {
        h.reporter.flush().await;
        h.sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Migration { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_migration_moves_object() {
        let source = seeded(b"quarterly numbers").await;
        let target = FaultyAdapter::new();
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::Completed);
        assert_eq!(plan.target_provider, "dropbox");
        assert_eq!(plan.size_bytes, 17);
        assert!(plan.error_kind.is_none());
        assert!(!source.contains(&key()));
        assert!(target.contains(&key()));

        assert_eq!(
            states(&h).await,
            vec![
                MigrationState::Planned,
                MigrationState::Copying,
                MigrationState::Verifying,
                MigrationState::DeletingSource,
                MigrationState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let h = harness(vec![("s3", 1000, FaultyAdapter::new())]);
        assert!(matches!(
            h.coordinator.migrate(&key(), "ghost").await,
            Err(Error::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_no_alternative_provider() {
        let source = seeded(b"data").await;
        let h = harness(vec![("s3", 1000, source.clone())]);
        assert!(matches!(
            h.coordinator.migrate(&key(), "s3").await,
            Err(Error::NoAlternativeProvider { .. })
        ));

        let source = seeded(b"too large for the target").await;
        let h = harness(vec![("s3", 1000, source.clone()), ("tiny", 4, FaultyAdapter::new())]);
        assert!(matches!(
            h.coordinator.migrate(&key(), "s3").await,
            Err(Error::NoAlternativeProvider { .. })
        ));
        assert!(source.contains(&key()));
    }

    #[tokio::test]
    async fn test_missing_source_object() {
        let h = harness(vec![
            ("s3", 1000, FaultyAdapter::new()),
            ("dropbox", 1000, FaultyAdapter::new()),
        ]);
        assert!(matches!(
            h.coordinator.migrate(&key(), "s3").await,
            Err(Error::Transfer { kind: ErrorKind::NotFound, .. })
        ));
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_source() {
        let source = seeded(b"data").await;
        let target = FaultyAdapter::new();
        target.fail_uploads(true);
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::Failed);
        assert_eq!(plan.error_kind, Some(ErrorKind::Storage));
        assert!(source.contains(&key()));
        assert!(!target.contains(&key()));
        assert_eq!(states(&h).await.last(), Some(&MigrationState::Failed));
    }

    #[tokio::test]
    async fn test_verification_failure_rolls_back() {
        let source = seeded(b"data").await;
        let target = FaultyAdapter::new();
        target.corrupt_stat(true);
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::RolledBack);
        assert_eq!(plan.error_kind, Some(ErrorKind::VerificationFailed));
        assert!(source.contains(&key()));
        assert!(!target.contains(&key()));
    }

    #[tokio::test]
    async fn test_failed_rollback_ends_failed() {
        let source = seeded(b"data").await;
        let target = FaultyAdapter::new();
        target.corrupt_stat(true);
        target.fail_deletes(true);
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::Failed);
        assert_eq!(plan.error_kind, Some(ErrorKind::Storage));
        assert!(source.contains(&key()));
    }

    #[tokio::test]
    async fn test_source_cleanup_failure_still_completes() {
        let source = seeded(b"data").await;
        source.fail_deletes(true);
        let target = FaultyAdapter::new();
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::Completed);
        assert_eq!(plan.error_kind, Some(ErrorKind::SourceCleanupFailed));
        assert!(source.contains(&key()));
        assert!(target.contains(&key()));

        h.reporter.flush().await;
        let completed = h.sink.events().into_iter().find_map(|e| match e {
            EngineEvent::Migration {
                state: MigrationState::Completed,
                error_kind,
                ..
            } => Some(error_kind),
            _ => None,
        });
        assert_eq!(completed, Some(Some(ErrorKind::SourceCleanupFailed)));
    }

    #[tokio::test]
    async fn test_short_read_never_deletes_source() {
        let source = seeded(b"0123456789").await;
        source.short_reads(true);
        let target = FaultyAdapter::new();
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::Failed);
        assert_eq!(plan.error_kind, Some(ErrorKind::VerificationFailed));
        assert_eq!(plan.size_bytes, 10);
        assert!(source.contains(&key()));
        assert!(!target.contains(&key()));
        assert_eq!(states(&h).await.last(), Some(&MigrationState::Failed));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_with_source_rolls_back() {
        let source = seeded(b"original").await;
        let target = FaultyAdapter::new();
        target.corrupt_checksum(true);
        let h = harness(vec![("s3", 1000, source.clone()), ("dropbox", 1000, target.clone())]);

        let plan = h.coordinator.migrate(&key(), "s3").await.unwrap();
        assert_eq!(plan.state, MigrationState::RolledBack);
        assert_eq!(plan.error_kind, Some(ErrorKind::VerificationFailed));
        assert!(plan.error_message.unwrap().contains("checksum"));
        assert!(source.contains(&key()));
        assert!(!target.contains(&key()));
    }

    #[tokio::test]
    async fn test_cancelled_migration_keeps_source() {
        let source = seeded(b"in flight").await;
        let target = GatedAdapter::new();
        let h = harness_with(vec![
            ("s3", 1000, Arc::new(source.clone()) as Arc<dyn StorageAdapter>),
            ("dropbox", 1000, Arc::new(target.clone()) as Arc<dyn StorageAdapter>),
        ]);
        let coordinator = Arc::new(h.coordinator);

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.migrate(&key(), "s3").await })
        };
        while target.entered() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(source.contains(&key()));
        assert!(!target.contains(&key()));

        h.reporter.flush().await;
        let last = h.sink.events().into_iter().rev().find_map(|e| match e {
            EngineEvent::Migration { state, .. } => Some(state),
            _ => None,
        });
        assert_eq!(last, Some(MigrationState::Copying));
    }

    #[test]
    fn test_terminal_states() {
        assert!(MigrationState::Completed.is_terminal());
        assert!(MigrationState::RolledBack.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(!MigrationState::Verifying.is_terminal());
    }
}

//! Transfer executor: runs one adapter operation against a named provider.
//!
//! Every call produces exactly one [`TransferOutcome`], reported to the event
//! reporter whether the call succeeded, failed at the adapter, or never got
//! past its preconditions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

use strata_common::{Error, ErrorKind, ObjectKey, Result};
use strata_storage::{collect_stream, ByteStream, ObjectInfo};

use crate::events::{EngineEvent, EventReporter};
use crate::registry::{Operation, ProviderEntry, ProviderRegistry};

/// What to do when a provider is at its concurrent transfer limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Wait for a transfer slot.
    #[default]
    Block,
    /// Fail immediately with `ProviderBusy`.
    Reject,
}

/// Result of one executor call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub provider: String,
    pub success: bool,
    pub bytes_transferred: u64,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl TransferOutcome {
    fn succeeded(provider: &str, bytes_transferred: u64, started: Instant) -> Self {
        Self {
            provider: provider.to_string(),
            success: true,
            bytes_transferred,
            error_kind: None,
            error_message: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(provider: &str, error: &Error, started: Instant) -> Self {
        Self {
            provider: provider.to_string(),
            success: false,
            bytes_transferred: 0,
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// The failure as an error, or `None` for a successful outcome.
    pub fn to_error(&self) -> Option<Error> {
        if self.success {
            return None;
        }
        Some(Error::Transfer {
            provider: self.provider.clone(),
            kind: self.error_kind.unwrap_or(ErrorKind::Storage),
            message: self.error_message.clone().unwrap_or_default(),
        })
    }
}

/// A finished download. `data` is present exactly when the outcome succeeded.
#[derive(Debug)]
pub struct Download {
    pub outcome: TransferOutcome,
    pub data: Option<Vec<u8>>,
}

/// Runs adapter calls under per-provider concurrency limits.
pub struct TransferExecutor {
    registry: Arc<ProviderRegistry>,
    reporter: EventReporter,
    backpressure: BackpressureMode,
}

impl TransferExecutor {
    /// Create a new executor.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        reporter: EventReporter,
        backpressure: BackpressureMode,
    ) -> Self {
        Self {
            registry,
            reporter,
            backpressure,
        }
    }

    /// Configured backpressure mode.
    pub fn backpressure(&self) -> BackpressureMode {
        self.backpressure
    }

    /// Check preconditions and take a transfer slot.
    async fn admit(
        &self,
        provider: &str,
        operation: Operation,
        size_bytes: Option<u64>,
    ) -> Result<(Arc<ProviderEntry>, OwnedSemaphorePermit)> {
        let entry = self
            .registry
            .entry(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))?;

        if !entry.limits().supports(operation) {
            return Err(Error::UnsupportedOperation {
                provider: provider.to_string(),
                operation: operation.to_string(),
            });
        }

        if let Some(size_bytes) = size_bytes {
            let limit_bytes = entry.limits().max_file_size_bytes;
            if size_bytes > limit_bytes {
                return Err(Error::SizeLimitExceeded {
                    provider: provider.to_string(),
                    size_bytes,
                    limit_bytes,
                });
            }
        }

        let permits = entry.permits();
        let permit = match self.backpressure {
            // The semaphore is never closed, so acquire only fails if that changes.
            BackpressureMode::Block => permits
                .acquire_owned()
                .await
                .map_err(|_| Error::ProviderBusy(provider.to_string()))?,
            BackpressureMode::Reject => permits.try_acquire_owned().map_err(|_| {
                debug!("Rejecting {} on busy provider '{}'", operation, provider);
                Error::ProviderBusy(provider.to_string())
            })?,
        };

        Ok((entry, permit))
    }

    fn report(&self, operation: Operation, key: &ObjectKey, outcome: &TransferOutcome) {
        if !outcome.success {
            warn!(
                "{} of '{}' on '{}' failed: {}",
                operation,
                key,
                outcome.provider,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        self.reporter.report(EngineEvent::Transfer {
            operation,
            object_key: key.to_string(),
            outcome: outcome.clone(),
        });
    }

    /// Report a failed precondition and hand the error back.
    fn reject<T>(
        &self,
        operation: Operation,
        provider: &str,
        key: &ObjectKey,
        error: Error,
        started: Instant,
    ) -> Result<T> {
        let outcome = TransferOutcome::failed(provider, &error, started);
        self.report(operation, key, &outcome);
        Err(error)
    }

    /// Upload an object to a provider.
    ///
    /// # Errors
    /// - `UnknownProvider`, `UnsupportedOperation`, `SizeLimitExceeded` or
    ///   `ProviderBusy` when the transfer never starts
    ///
    /// Adapter failures are returned as an unsuccessful outcome, not an error.
    pub async fn upload(
        &self,
        provider: &str,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<TransferOutcome> {
        let started = Instant::now();
        let admitted = self
            .admit(provider, Operation::Upload, Some(size_bytes))
            .await;
        let (entry, _permit) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => return self.reject(Operation::Upload, provider, key, e, started),
        };

        let outcome = match entry.adapter().upload(key, stream, size_bytes).await {
            Ok(info) => TransferOutcome::succeeded(entry.name(), info.size_bytes, started),
            Err(e) => TransferOutcome::failed(entry.name(), &e, started),
        };
        self.report(Operation::Upload, key, &outcome);
        Ok(outcome)
    }

    /// Download an object, buffered in full while the transfer slot is held.
    ///
    /// # Errors
    /// Same precondition errors as [`upload`](Self::upload), minus the size check.
    pub async fn download(&self, provider: &str, key: &ObjectKey) -> Result<Download> {
        let started = Instant::now();
        let (entry, _permit) = match self.admit(provider, Operation::Download, None).await {
            Ok(admitted) => admitted,
            Err(e) => return self.reject(Operation::Download, provider, key, e, started),
        };

        let result = match entry.adapter().download(key).await {
            Ok(stream) => collect_stream(stream).await,
            Err(e) => Err(e),
        };
        let download = match result {
            Ok(data) => Download {
                outcome: TransferOutcome::succeeded(entry.name(), data.len() as u64, started),
                data: Some(data),
            },
            Err(e) => Download {
                outcome: TransferOutcome::failed(entry.name(), &e, started),
                data: None,
            },
        };
        self.report(Operation::Download, key, &download.outcome);
        Ok(download)
    }

    /// Delete an object. A missing object yields an outcome with `NotFound`.
    pub async fn delete(&self, provider: &str, key: &ObjectKey) -> Result<TransferOutcome> {
        let started = Instant::now();
        let (entry, _permit) = match self.admit(provider, Operation::Delete, None).await {
            Ok(admitted) => admitted,
            Err(e) => return self.reject(Operation::Delete, provider, key, e, started),
        };

        let outcome = match entry.adapter().delete(key).await {
            Ok(()) => TransferOutcome::succeeded(entry.name(), 0, started),
            Err(e) => TransferOutcome::failed(entry.name(), &e, started),
        };
        self.report(Operation::Delete, key, &outcome);
        Ok(outcome)
    }

    /// Describe a stored object. Counts against the transfer limit but is not
    /// reported as a transfer.
    ///
    /// # Errors
    /// - Precondition errors as for [`download`](Self::download)
    /// - `Transfer` wrapping the adapter failure
    pub async fn stat(&self, provider: &str, key: &ObjectKey) -> Result<ObjectInfo> {
        let (entry, _permit) = self.admit(provider, Operation::Download, None).await?;
        entry.adapter().stat(key).await.map_err(|e| Error::Transfer {
            provider: provider.to_string(),
            kind: e.kind(),
            message: e.to_string(),
        })
    }
}

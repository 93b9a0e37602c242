//! Live usage refresh: on demand and periodic.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use strata_common::{Error, Result};

use crate::registry::ProviderRegistry;

/// Poll every adapter's usage once and record it.
///
/// Adapters that cannot report usage are skipped; adapter errors are logged
/// and skipped. Returns how many providers were updated.
pub async fn refresh_usage(registry: &ProviderRegistry) -> usize {
    let mut updated = 0;
    for entry in registry.entries() {
        match entry.adapter().usage().await {
            Ok(Some(bytes)) => {
                registry.update_usage(entry.name(), bytes);
                updated += 1;
            }
            Ok(None) => debug!("Provider '{}' does not report usage", entry.name()),
            Err(e) => warn!("Usage refresh failed for '{}': {}", entry.name(), e),
        }
    }
    debug!("Refreshed usage for {} providers", updated);
    updated
}

enum RefreshRequest {
    Now(oneshot::Sender<usize>),
    Shutdown,
}

/// Handle to a running periodic usage refresher.
pub struct UsageRefreshHandle {
    request_tx: mpsc::Sender<RefreshRequest>,
    task: JoinHandle<()>,
}

impl UsageRefreshHandle {
    /// Start refreshing every `period`. The first refresh runs immediately.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(registry: Arc<ProviderRegistry>, period: Duration) -> Self {
        let (request_tx, mut request_rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Usage refresher started (every {:?})", period);

            loop {
                tokio::select! {
                    request = request_rx.recv() => match request {
                        Some(RefreshRequest::Now(reply)) => {
                            let _ = reply.send(refresh_usage(&registry).await);
                        }
                        Some(RefreshRequest::Shutdown) | None => break,
                    },
                    _ = ticker.tick() => {
                        refresh_usage(&registry).await;
                    }
                }
            }

            info!("Usage refresher stopped");
        });

        Self { request_tx, task }
    }

    /// Run a refresh now, outside the schedule.
    ///
    /// # Errors
    /// - The refresher has stopped
    pub async fn refresh_now(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(RefreshRequest::Now(reply_tx))
            .await
            .map_err(|_| Error::InvalidInput("Usage refresher is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::InvalidInput("Usage refresher stopped mid-refresh".to_string()))
    }

    /// Stop the refresher and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.request_tx.send(RefreshRequest::Shutdown).await;
        let _ = self.task.await;
    }
}

//! Event reporting to the external telemetry sink.
//!
//! `report` never blocks and never fails: records go onto a bounded queue and a
//! background task hands them to the sink. Anything that cannot be delivered
//! (queue full, reporter shut down, sink error) is dropped and counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_common::{Error, ErrorKind, Result};

use crate::analysis::EfficiencyReport;
use crate::executor::TransferOutcome;
use crate::migration::MigrationState;
use crate::registry::{Operation, ProviderKind};

/// Something the engine did that the telemetry sink should learn about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    /// One transfer executor call finished.
    Transfer {
        operation: Operation,
        object_key: String,
        outcome: TransferOutcome,
    },
    /// The selector picked a provider for an upload.
    Selection {
        owner_id: String,
        object_key: String,
        size_bytes: u64,
        provider: String,
    },
    /// A migration entered a new state.
    Migration {
        object_key: String,
        source_provider: String,
        target_provider: String,
        state: MigrationState,
        error_kind: Option<ErrorKind>,
    },
    ProviderRegistered {
        name: String,
        kind: ProviderKind,
    },
    ProviderDeregistered {
        name: String,
    },
    AvailabilityChanged {
        name: String,
        available: bool,
    },
    EfficiencyAnalysis {
        report: EfficiencyReport,
    },
}

/// Envelope delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventRecord {
    /// Wrap an event with a fresh id and the current time.
    pub fn new(event: EngineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            event,
        }
    }
}

/// Destination for event records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Deliver one record.
    async fn emit(&self, record: EventRecord) -> Result<()>;
}

/// Sink that writes each record to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn emit(&self, record: EventRecord) -> Result<()> {
        let json = serde_json::to_string(&record)?;
        info!(target: "strata::telemetry", "{}", json);
        Ok(())
    }
}

/// Sink that POSTs each record as JSON to an HTTP endpoint.
#[derive(Clone)]
pub struct HttpTelemetrySink {
    client: Client,
    endpoint: url::Url,
}

impl HttpTelemetrySink {
    /// Create a sink for `endpoint`.
    ///
    /// # Errors
    /// - Invalid endpoint URL
    /// - HTTP client construction failed
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| Error::InvalidInput(format!("Invalid telemetry endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn emit(&self, record: EventRecord) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&record)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Telemetry delivery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "Telemetry endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

enum Message {
    Record(EventRecord),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct ReporterStats {
    dropped: AtomicU64,
    delivered: AtomicU64,
}

/// Non-blocking handle for reporting events. Cheap to clone.
#[derive(Clone)]
pub struct EventReporter {
    tx: mpsc::Sender<Message>,
    stats: Arc<ReporterStats>,
}

impl EventReporter {
    /// Start the delivery task and return a reporter feeding it.
    ///
    /// Must be called inside a tokio runtime. The task exits once every
    /// reporter clone has been dropped and the queue has drained.
    pub fn spawn(sink: Arc<dyn TelemetrySink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Message>(capacity.max(1));
        let stats = Arc::new(ReporterStats::default());
        let task_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Record(record) => match sink.emit(record).await {
                        Ok(()) => {
                            task_stats.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            task_stats.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!("Dropped telemetry event: {}", e);
                        }
                    },
                    Message::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Event reporter stopped");
        });

        Self { tx, stats }
    }

    /// Enqueue an event. Never blocks, never fails.
    pub fn report(&self, event: EngineEvent) {
        if let Err(e) = self.tx.try_send(Message::Record(EventRecord::new(event))) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped telemetry event (queue full or closed): {}", e);
        }
    }

    /// Wait until every event enqueued before this call has been handled.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Events dropped so far.
    pub fn dropped_events(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Events delivered to the sink so far.
    pub fn delivered_events(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }
}

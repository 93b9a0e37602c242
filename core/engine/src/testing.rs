//! Test doubles shared by the engine's unit tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use strata_common::{Error, ObjectKey, Result, SecretString};
use strata_storage::{
    collect_stream, stream_from_bytes, ByteStream, MemoryAdapter, ObjectInfo, StorageAdapter,
};

use crate::credentials::{AccessToken, Credential, CredentialSource};
use crate::events::{EngineEvent, EventRecord, EventReporter, TelemetrySink};

/// Sink that keeps every record.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn emit(&self, record: EventRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

pub fn collecting_reporter() -> (EventReporter, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::default());
    (EventReporter::spawn(sink.clone(), 1024), sink)
}

/// Reporter whose events nobody inspects.
pub fn reporter() -> EventReporter {
    collecting_reporter().0
}

/// Credential source counting its calls.
pub struct CountingSource {
    failing: AtomicBool,
    stored_expiry: Option<chrono::Duration>,
    delay: Option<Duration>,
    get_calls: AtomicU32,
    refresh_calls: AtomicU32,
}

impl CountingSource {
    pub fn ok() -> Self {
        Self {
            failing: AtomicBool::new(false),
            stored_expiry: None,
            delay: None,
            get_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        let source = Self::ok();
        source.failing.store(true, Ordering::SeqCst);
        source
    }

    /// Hand out a stored token expiring `expires_in` from now.
    pub fn with_stored_token(mut self, expires_in: chrono::Duration) -> Self {
        self.stored_expiry = Some(expires_in);
        self
    }

    /// Make every refresh take this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for CountingSource {
    async fn get_credential(&self, provider: &str) -> Result<Credential> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        match self.stored_expiry {
            Some(expires_in) => Ok(Credential::Token(AccessToken {
                token: SecretString::new(format!("stored-{}", provider)),
                expires_at: Some(Utc::now() + expires_in),
            })),
            None => Err(Error::Authentication("nothing stored".to_string())),
        }
    }

    async fn refresh_credential(&self, provider: &str) -> Result<AccessToken> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Authentication("invalid_grant".to_string()));
        }
        Ok(AccessToken {
            token: SecretString::new(format!("fresh-{}", provider)),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }
}

#[derive(Default)]
struct Faults {
    uploads: AtomicBool,
    deletes: AtomicBool,
    short_reads: AtomicBool,
    stat: AtomicBool,
    checksum: AtomicBool,
    usage: AtomicBool,
    health: AtomicBool,
}

/// Memory adapter with switchable failures.
#[derive(Clone, Default)]
pub struct FaultyAdapter {
    inner: MemoryAdapter,
    faults: Arc<Faults>,
}

impl FaultyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.inner.contains(key)
    }

    pub fn fail_uploads(&self, on: bool) {
        self.faults.uploads.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.faults.deletes.store(on, Ordering::SeqCst);
    }

    /// Serve downloads one byte short.
    pub fn short_reads(&self, on: bool) {
        self.faults.short_reads.store(on, Ordering::SeqCst);
    }

    /// Report one byte more than is stored.
    pub fn corrupt_stat(&self, on: bool) {
        self.faults.stat.store(on, Ordering::SeqCst);
    }

    /// Report a checksum that matches nothing.
    pub fn corrupt_checksum(&self, on: bool) {
        self.faults.checksum.store(on, Ordering::SeqCst);
    }

    pub fn fail_usage(&self, on: bool) {
        self.faults.usage.store(on, Ordering::SeqCst);
    }

    pub fn fail_health(&self, on: bool) {
        self.faults.health.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageAdapter for FaultyAdapter {
    fn backend(&self) -> &str {
        "faulty"
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<ObjectInfo> {
        if self.faults.uploads.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected upload failure".to_string()));
        }
        self.inner.upload(key, stream, size_bytes).await
    }

    async fn download(&self, key: &ObjectKey) -> Result<ByteStream> {
        let stream = self.inner.download(key).await?;
        if !self.faults.short_reads.load(Ordering::SeqCst) {
            return Ok(stream);
        }
        let mut data = collect_stream(stream).await?;
        data.pop();
        Ok(stream_from_bytes(data))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        if self.faults.deletes.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected delete failure".to_string()));
        }
        self.inner.delete(key).await
    }

    async fn stat(&self, key: &ObjectKey) -> Result<ObjectInfo> {
        let mut info = self.inner.stat(key).await?;
        if self.faults.stat.load(Ordering::SeqCst) {
            info.size_bytes += 1;
        }
        if self.faults.checksum.load(Ordering::SeqCst) {
            info.checksum = Some("ffffffff".to_string());
        }
        Ok(info)
    }

    async fn usage(&self) -> Result<Option<u64>> {
        if self.faults.usage.load(Ordering::SeqCst) {
            return Err(Error::Network("injected usage failure".to_string()));
        }
        self.inner.usage().await
    }

    async fn health_check(&self) -> Result<()> {
        if self.faults.health.load(Ordering::SeqCst) {
            return Err(Error::Network("injected health failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct UploadCounters {
    entered: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Memory adapter whose uploads wait until released.
#[derive(Clone)]
pub struct GatedAdapter {
    inner: MemoryAdapter,
    gate: Arc<Semaphore>,
    counters: Arc<UploadCounters>,
}

impl GatedAdapter {
    pub fn new() -> Self {
        Self {
            inner: MemoryAdapter::new(),
            gate: Arc::new(Semaphore::new(0)),
            counters: Arc::new(UploadCounters::default()),
        }
    }

    /// Uploads that reached the adapter, released or not.
    pub fn entered(&self) -> usize {
        self.counters.entered.load(Ordering::SeqCst)
    }

    /// Most uploads ever inside the adapter at once.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.inner.contains(key)
    }

    /// Let `n` more uploads through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl StorageAdapter for GatedAdapter {
    fn backend(&self) -> &str {
        "gated"
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<ObjectInfo> {
        self.counters.entered.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.inner.upload(key, stream, size_bytes).await
            }
            Err(_) => Err(Error::Storage("gate closed".to_string())),
        };
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download(&self, key: &ObjectKey) -> Result<ByteStream> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.inner.delete(key).await
    }
}

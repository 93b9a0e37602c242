//! In-memory storage adapter for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use strata_common::{Error, ObjectKey, Result};
use crate::provider::{
    collect_stream, crc32_hex, stream_from_bytes, ByteStream, ObjectInfo, StorageAdapter,
};

/// In-memory storage adapter.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    storage: Arc<RwLock<HashMap<ObjectKey, Vec<u8>>>>,
}

impl MemoryAdapter {
    /// Create a new empty memory adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an object is stored, without going through the adapter trait.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.storage.read().contains_key(key)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    fn info(key: &ObjectKey, data: &[u8]) -> ObjectInfo {
        ObjectInfo {
            key: key.clone(),
            size_bytes: data.len() as u64,
            checksum: Some(crc32_hex(data)),
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<ObjectInfo> {
        let data = collect_stream(stream).await?;
        if data.len() as u64 != size_bytes {
            return Err(Error::InvalidInput(format!(
                "Declared {} bytes but received {}",
                size_bytes,
                data.len()
            )));
        }

        let info = Self::info(key, &data);
        self.storage.write().insert(key.clone(), data);
        Ok(info)
    }

    async fn download(&self, key: &ObjectKey) -> Result<ByteStream> {
        let data = self
            .storage
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))?;
        Ok(stream_from_bytes(data))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        match self.storage.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Object not found: {}", key))),
        }
    }

    async fn stat(&self, key: &ObjectKey) -> Result<ObjectInfo> {
        let storage = self.storage.read();
        let data = storage
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))?;
        Ok(Self::info(key, data))
    }

    async fn usage(&self) -> Result<Option<u64>> {
        let total = self.storage.read().values().map(|d| d.len() as u64).sum();
        Ok(Some(total))
    }
}

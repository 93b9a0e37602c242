//! Storage adapter trait definition.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use strata_common::{ObjectKey, Result};

/// What an adapter knows about a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Key of the object.
    pub key: ObjectKey,
    /// Size in bytes.
    pub size_bytes: u64,
    /// CRC32 of the content as 8 lowercase hex digits, if the backend reports one.
    pub checksum: Option<String>,
}

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Build a single-chunk stream over an owned buffer.
pub fn stream_from_bytes(data: Vec<u8>) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a stream into one buffer.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// CRC32 of `data` as 8 lowercase hex digits.
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

/// Storage adapter for one backend.
///
/// Adapters are the only place backend-specific failures exist; every method
/// maps them into the common error taxonomy before returning. Adapters handle
/// their own wire authentication; the engine only guarantees that credentials
/// were fresh at selection time.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Get the backend type name (e.g., "memory", "local", "http").
    fn backend(&self) -> &str;

    /// Upload a complete object.
    ///
    /// # Preconditions
    /// - `stream` yields exactly `size_bytes` bytes
    ///
    /// # Postconditions
    /// - The object is stored under `key`, replacing any previous content
    ///
    /// # Errors
    /// - Network/I/O errors
    /// - Authentication errors
    async fn upload(&self, key: &ObjectKey, stream: ByteStream, size_bytes: u64)
        -> Result<ObjectInfo>;

    /// Download an object as a stream.
    ///
    /// # Errors
    /// - `NotFound` if no object exists under `key`
    async fn download(&self, key: &ObjectKey) -> Result<ByteStream>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if no object exists under `key`
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Describe a stored object.
    ///
    /// The default implementation downloads the whole object to learn its
    /// size and CRC32. Backends with a metadata call should override it.
    async fn stat(&self, key: &ObjectKey) -> Result<ObjectInfo> {
        let data = collect_stream(self.download(key).await?).await?;
        Ok(ObjectInfo {
            key: key.clone(),
            size_bytes: data.len() as u64,
            checksum: Some(crc32_hex(&data)),
        })
    }

    /// Bytes currently used on the backend, if the backend can tell.
    async fn usage(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Probe backend reachability.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_info_serialization() {
        let info = ObjectInfo {
            key: ObjectKey::new("docs/a.txt").unwrap(),
            size_bytes: 1024,
            checksum: Some("0badf00d".to_string()),
        };

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("sizeBytes"));
        let deserialized: ObjectInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, info);
    }

    #[test]
    fn test_crc32_hex_is_stable() {
        assert_eq!(crc32_hex(b""), "00000000");
        assert_eq!(crc32_hex(b"123456789"), "cbf43926");
    }

    #[tokio::test]
    async fn test_collect_stream() {
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(vec![1, 2]),
            Ok(vec![3]),
        ]));
        assert_eq!(collect_stream(stream).await.unwrap(), vec![1, 2, 3]);
    }
}

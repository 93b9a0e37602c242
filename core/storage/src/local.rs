//! Local filesystem storage adapter.

use async_trait::async_trait;
use futures::StreamExt;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{ByteStream, ObjectInfo, StorageAdapter};
use strata_common::{Error, ObjectKey, Result};

/// Prefix of in-progress upload files. Never a valid encoded key.
const PARTIAL_PREFIX: &str = ".partial-";

/// Local filesystem storage adapter.
///
/// Each object is one file directly under the root directory. Keys are
/// percent-encoded into a single file name, so `a/b.txt` never creates
/// a subdirectory.
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Create a new local adapter with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this adapter.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, key: &ObjectKey) -> PathBuf {
        let encoded = utf8_percent_encode(key.as_str(), NON_ALPHANUMERIC).to_string();
        self.root.join(encoded)
    }

    /// Recover the object key from a file name, skipping partial uploads.
    fn key_from_file_name(name: &str) -> Option<ObjectKey> {
        if name.starts_with(PARTIAL_PREFIX) {
            return None;
        }
        let decoded = percent_decode_str(name).decode_utf8().ok()?;
        ObjectKey::new(decoded.into_owned()).ok()
    }

    async fn ensure_file(&self, key: &ObjectKey) -> Result<PathBuf> {
        let fs_path = self.to_fs_path(key);
        match fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_file() => Ok(fs_path),
            Ok(_) => Err(Error::InvalidInput(format!("Not a file: {}", key))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the stream to `partial`, returning bytes written and the CRC32.
    async fn write_partial(partial: &Path, mut stream: ByteStream) -> Result<(u64, u32)> {
        let mut file = fs::File::create(partial).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok((written, hasher.finalize()))
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn backend(&self) -> &str {
        "local"
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<ObjectInfo> {
        let fs_path = self.to_fs_path(key);
        let partial = self.root.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));

        let (written, crc) = match Self::write_partial(&partial, stream).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Upload of '{}' aborted: {}", key, e);
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if written != size_bytes {
            let _ = fs::remove_file(&partial).await;
            return Err(Error::InvalidInput(format!(
                "Declared {} bytes but received {}",
                size_bytes, written
            )));
        }

        fs::rename(&partial, &fs_path).await?;
        debug!("Stored '{}' ({} bytes) at {}", key, written, fs_path.display());

        Ok(ObjectInfo {
            key: key.clone(),
            size_bytes: written,
            checksum: Some(format!("{:08x}", crc)),
        })
    }

    async fn download(&self, key: &ObjectKey) -> Result<ByteStream> {
        let fs_path = self.ensure_file(key).await?;
        let file = fs::File::open(&fs_path).await?;

        let stream = ReaderStream::new(file).map(|chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(Error::from)
        });
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let fs_path = self.ensure_file(key).await?;
        fs::remove_file(&fs_path).await?;
        Ok(())
    }

    async fn stat(&self, key: &ObjectKey) -> Result<ObjectInfo> {
        let fs_path = self.ensure_file(key).await?;
        let mut file = fs::File::open(&fs_path).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut size_bytes = 0u64;

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size_bytes += n as u64;
        }

        Ok(ObjectInfo {
            key: key.clone(),
            size_bytes,
            checksum: Some(format!("{:08x}", hasher.finalize())),
        })
    }

    async fn usage(&self) -> Result<Option<u64>> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if Self::key_from_file_name(name).is_none() {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                total += meta.len();
            }
        }

        Ok(Some(total))
    }

    async fn health_check(&self) -> Result<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(Error::Storage(format!(
                "Root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{collect_stream, crc32_hex, stream_from_bytes};
    use tempfile::TempDir;

    fn key(s: &str) -> ObjectKey {
        ObjectKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_local_upload_download() {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path()).unwrap();
        let data = b"Hello, Local!".to_vec();

        let info = adapter
            .upload(&key("docs/hello.txt"), stream_from_bytes(data.clone()), data.len() as u64)
            .await
            .unwrap();
        assert_eq!(info.checksum, Some(crc32_hex(&data)));

        let downloaded = collect_stream(adapter.download(&key("docs/hello.txt")).await.unwrap())
            .await
            .unwrap();
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_keys_do_not_create_directories() {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path()).unwrap();

        adapter
            .upload(&key("../escape"), stream_from_bytes(vec![1]), 1)
            .await
            .unwrap();

        let mut names = Vec::new();
        for entry in std::fs::read_dir(temp.path()).unwrap() {
            names.push(entry.unwrap().file_name().into_string().unwrap());
        }
        assert_eq!(names.len(), 1);
        assert!(!names[0].contains('/'));
        assert_eq!(LocalAdapter::key_from_file_name(&names[0]), Some(key("../escape")));
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path()).unwrap();

        let result = adapter
            .upload(&key("short"), stream_from_bytes(vec![1, 2, 3]), 10)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path()).unwrap();

        assert!(matches!(adapter.delete(&key("nope")).await, Err(Error::NotFound(_))));
        assert!(matches!(adapter.stat(&key("nope")).await, Err(Error::NotFound(_))));
        assert!(adapter.download(&key("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_stat_and_usage() {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path()).unwrap();

        adapter.upload(&key("a"), stream_from_bytes(vec![9; 100]), 100).await.unwrap();
        adapter.upload(&key("b"), stream_from_bytes(vec![9; 28]), 28).await.unwrap();

        let info = adapter.stat(&key("a")).await.unwrap();
        assert_eq!(info.size_bytes, 100);
        assert_eq!(info.checksum, Some(crc32_hex(&[9; 100])));
        assert_eq!(adapter.usage().await.unwrap(), Some(128));
        adapter.health_check().await.unwrap();
    }
}

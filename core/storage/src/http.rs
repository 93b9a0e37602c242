//! Storage adapter for dynamically registered third-party HTTP storage APIs.
//!
//! The remote API is expected to expose:
//! - `GET  {api}/status`: reachability probe
//! - `GET  {api}/storage-info`: `{"usedBytes": n}` (`totalStorage` accepted as alias)
//! - `PUT  {api}/objects/{key}`: upload raw bytes
//! - `GET  {api}/objects/{key}`: download raw bytes
//! - `HEAD {api}/objects/{key}`: size in `x-object-size` (or `content-length`),
//!   optional CRC32 in `x-object-crc32`
//! - `DELETE {api}/objects/{key}`
//!
//! Keys are percent-encoded into a single path segment.

use async_trait::async_trait;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use strata_common::{Error, ObjectKey, Result, SecretString};

use crate::provider::{ByteStream, ObjectInfo, StorageAdapter};

/// Header carrying the object size on `HEAD` responses.
pub const OBJECT_SIZE_HEADER: &str = "x-object-size";
/// Header carrying the object CRC32 on `HEAD` responses.
pub const OBJECT_CRC32_HEADER: &str = "x-object-crc32";

/// Configuration for an HTTP storage adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAdapterConfig {
    /// Base URL of the storage API.
    pub api_url: String,
    /// Bearer API key, if the API requires one.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageInfoResponse {
    #[serde(alias = "totalStorage")]
    used_bytes: u64,
}

/// HTTP storage adapter.
pub struct HttpAdapter {
    http: Client,
    base: String,
    api_key: Option<SecretString>,
}

impl HttpAdapter {
    /// Create a new HTTP adapter.
    ///
    /// # Errors
    /// - `api_url` is not an absolute http(s) URL
    /// - HTTP client construction failed
    pub fn new(config: HttpAdapterConfig) -> Result<Self> {
        let url = Url::parse(&config.api_url)
            .map_err(|e| {
                Error::InvalidInput(format!("Invalid API URL '{}': {}", config.api_url, e))
            })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidInput(format!(
                "Unsupported API URL scheme: {}",
                url.scheme()
            )));
        }

        let http = Client::builder()
            .user_agent("Strata/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    /// Base URL of the API.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}/objects/{}",
            self.base,
            utf8_percent_encode(key.as_str(), NON_ALPHANUMERIC)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => {
                request.header(header::AUTHORIZATION, format!("Bearer {}", key.expose()))
            }
            _ => request,
        }
    }

    /// Map a non-success response into the error taxonomy.
    async fn check_status(response: Response, what: &str) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(format!("{}: resource not found", what)))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Authentication(format!("{}: {}", what, status)))
        } else {
            debug!("{} returned {}", what, status);
            let body = response.text().await.unwrap_or_default();
            Err(Error::Storage(format!("{}: {} - {}", what, status, body)))
        }
    }

    fn header_value<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
impl StorageAdapter for HttpAdapter {
    fn backend(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        key: &ObjectKey,
        stream: ByteStream,
        size_bytes: u64,
    ) -> Result<ObjectInfo> {
        debug!("PUT {} bytes to {}", size_bytes, self.object_url(key));
        let request = self
            .http
            .put(self.object_url(key))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, size_bytes.to_string())
            .body(reqwest::Body::wrap_stream(stream));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload object: {}", e)))?;
        Self::check_status(response, "Upload").await?;

        Ok(ObjectInfo {
            key: key.clone(),
            size_bytes,
            checksum: None,
        })
    }

    async fn download(&self, key: &ObjectKey) -> Result<ByteStream> {
        let response = self
            .authorize(self.http.get(self.object_url(key)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start download: {}", e)))?;
        let response = Self::check_status(response, "Download").await?;

        let stream = response.bytes_stream().map(|result| {
            result
                .map(|b| b.to_vec())
                .map_err(|e| Error::Network(format!("Stream read error: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let response = self
            .authorize(self.http.delete(self.object_url(key)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete object: {}", e)))?;
        Self::check_status(response, "Delete").await?;
        Ok(())
    }

    async fn stat(&self, key: &ObjectKey) -> Result<ObjectInfo> {
        let response = self
            .authorize(self.http.head(self.object_url(key)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to stat object: {}", e)))?;
        let response = Self::check_status(response, "Stat").await?;

        let size_bytes = Self::header_value(&response, OBJECT_SIZE_HEADER)
            .or_else(|| Self::header_value(&response, header::CONTENT_LENGTH.as_str()))
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| Error::Storage("Stat response carries no object size".to_string()))?;
        let checksum = Self::header_value(&response, OBJECT_CRC32_HEADER)
            .map(|v| v.to_ascii_lowercase());

        Ok(ObjectInfo {
            key: key.clone(),
            size_bytes,
            checksum,
        })
    }

    async fn usage(&self) -> Result<Option<u64>> {
        let response = self
            .authorize(self.http.get(format!("{}/storage-info", self.base)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch storage info: {}", e)))?;
        let response = Self::check_status(response, "Storage info").await?;

        let info: StorageInfoResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse storage info: {}", e)))?;
        Ok(Some(info.used_bytes))
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .authorize(self.http.get(format!("{}/status", self.base)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Status probe failed: {}", e)))?;
        Self::check_status(response, "Status probe").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{collect_stream, stream_from_bytes};
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;
    use serde_json::json;

    fn adapter_for(server: &MockServer) -> HttpAdapter {
        HttpAdapter::new(HttpAdapterConfig {
            api_url: server.base_url(),
            api_key: Some(SecretString::new("k3y")),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn key(s: &str) -> ObjectKey {
        ObjectKey::new(s).unwrap()
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = HttpAdapter::new(HttpAdapterConfig {
            api_url: "ftp://example.com".to_string(),
            api_key: None,
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_object_url_encodes_key() {
        let adapter = HttpAdapter::new(HttpAdapterConfig {
            api_url: "https://store.example.com/api/".to_string(),
            api_key: None,
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            adapter.object_url(&key("a/b c")),
            "https://store.example.com/api/objects/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn test_health_check_sends_bearer_key() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/status").header("authorization", "Bearer k3y");
            then.status(200);
        });

        adapter_for(&server).health_check().await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_usage_accepts_total_storage_alias() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/storage-info");
            then.status(200).json_body(json!({ "totalStorage": 4096 }));
        });

        assert_eq!(adapter_for(&server).usage().await.unwrap(), Some(4096));
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let server = MockServer::start_async().await;
        let put = server.mock(|when, then| {
            when.method(PUT).path("/objects/report1").body("hello");
            then.status(201);
        });
        server.mock(|when, then| {
            when.method(GET).path("/objects/report1");
            then.status(200).body("hello");
        });

        let adapter = adapter_for(&server);
        let info = adapter
            .upload(&key("report1"), stream_from_bytes(b"hello".to_vec()), 5)
            .await
            .unwrap();
        assert_eq!(info.size_bytes, 5);
        put.assert();

        let data = collect_stream(adapter.download(&key("report1")).await.unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_stat_reads_size_headers() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(HEAD).path("/objects/report1");
            then.status(200)
                .header(OBJECT_SIZE_HEADER, "42")
                .header(OBJECT_CRC32_HEADER, "CBF43926");
        });

        let info = adapter_for(&server).stat(&key("report1")).await.unwrap();
        assert_eq!(info.size_bytes, 42);
        assert_eq!(info.checksum.as_deref(), Some("cbf43926"));
    }

    #[tokio::test]
    async fn test_status_codes_map_to_taxonomy() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(DELETE).path("/objects/missing");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(DELETE).path("/objects/locked");
            then.status(403);
        });
        server.mock(|when, then| {
            when.method(DELETE).path("/objects/broken");
            then.status(500).body("boom");
        });

        let adapter = adapter_for(&server);
        assert!(matches!(adapter.delete(&key("missing")).await, Err(Error::NotFound(_))));
        assert!(matches!(adapter.delete(&key("locked")).await, Err(Error::Authentication(_))));
        assert!(matches!(adapter.delete(&key("broken")).await, Err(Error::Storage(_))));
    }
}

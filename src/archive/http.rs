//! Binance Vision archive source
//!
//! Downloads archives over HTTP, streaming the body to a temporary file that
//! is renamed into place once complete. Optionally validates the SHA-256
//! digest published in the `.CHECKSUM` companion file.

use super::{ArchiveReference, ArchiveSource, FetchError, FetchResult, BINANCE_VISION_BASE_URL};
use crate::downloader::config::{EXISTS_TIMEOUT, USER_AGENT};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Archive source backed by the public data portal
#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: Client,
    base_url: String,
    timeout: Duration,
    verify_checksum: bool,
}

impl HttpArchiveSource {
    /// Create a source for the default host with a per-request timeout
    pub fn new(timeout: Duration) -> FetchResult<Self> {
        Self::new_with_base_url(BINANCE_VISION_BASE_URL, timeout)
    }

    /// Create with custom base URL (for testing)
    pub fn new_with_base_url(base_url: impl Into<String>, timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::NetworkError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            verify_checksum: false,
        })
    }

    /// Validate each archive against its `.CHECKSUM` file
    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksum = enabled;
        self
    }

    /// Base URL archives are fetched from
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Compute SHA-256 hash of data as lowercase hex
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Parse a CHECKSUM file body (`"<hash>  <filename>"` or just `"<hash>"`)
    pub fn parse_checksum(content: &str) -> FetchResult<String> {
        let hash = content
            .split_whitespace()
            .next()
            .ok_or_else(|| FetchError::InvalidChecksum("empty CHECKSUM file".to_string()))?
            .to_lowercase();

        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FetchError::InvalidChecksum(format!(
                "not a SHA-256 digest: {hash}"
            )));
        }
        Ok(hash)
    }

    fn map_request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else {
            FetchError::NetworkError(e.to_string())
        }
    }

    async fn download_checksum(&self, checksum_url: &str) -> FetchResult<String> {
        debug!("Downloading CHECKSUM from {}", checksum_url);

        let response = self
            .client
            .get(checksum_url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
                url: checksum_url.to_string(),
            });
        }

        let content = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;
        Self::parse_checksum(&content)
    }

    /// Stream `url` into `temp_path`, returning the byte count
    async fn download_to(&self, url: &str, temp_path: &Path) -> FetchResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| FetchError::IoError(format!("Failed to create {}: {e}", temp_path.display())))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.map_request_error(e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::IoError(format!("Failed to write {}: {e}", temp_path.display())))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| FetchError::IoError(format!("Failed to flush {}: {e}", temp_path.display())))?;

        if written == 0 {
            return Err(FetchError::EmptyBody(url.to_string()));
        }
        Ok(written)
    }

    async fn verify(&self, reference: &ArchiveReference, path: &Path) -> FetchResult<()> {
        let expected = self
            .download_checksum(&reference.checksum_url(&self.base_url))
            .await?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::IoError(format!("Failed to read {}: {e}", path.display())))?;
        let actual = Self::compute_sha256(&bytes);

        if actual != expected {
            return Err(FetchError::ChecksumMismatch { expected, actual });
        }
        debug!("Checksum validation passed for {}", reference.file_name());
        Ok(())
    }
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, reference: &ArchiveReference, destination: &Path) -> FetchResult<u64> {
        let url = reference.url(&self.base_url);
        let temp_path = temp_path_for(destination);
        debug!("Downloading archive from {}", url);

        let result = match self.download_to(&url, &temp_path).await {
            Ok(bytes) if self.verify_checksum => {
                self.verify(reference, &temp_path).await.map(|_| bytes)
            }
            other => other,
        };

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&temp_path, destination).await.map_err(|e| {
                    FetchError::IoError(format!("Failed to move archive into place: {e}"))
                })?;
                Ok(bytes)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&temp_path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "Failed to remove partial download {}: {}",
                            temp_path.display(),
                            remove_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn exists(&self, reference: &ArchiveReference) -> bool {
        let url = reference.url(&self.base_url);
        match self.client.head(&url).timeout(EXISTS_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }

    fn locate(&self, reference: &ArchiveReference) -> String {
        reference.url(&self.base_url)
    }
}

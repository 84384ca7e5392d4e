//! Storage resolution for detector artifacts

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::LoadError;

/// File looked up when a reference names a directory
pub const ARTIFACT_FILE_NAME: &str = "detector.json";

/// Fragment prefix pinning the expected artifact digest
const CHECKSUM_FRAGMENT: &str = "sha256=";

/// Raw artifact bytes with their provenance
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    /// Concrete file or URL the bytes were read from
    pub location: String,
    /// SHA256 hex digest of `bytes`
    pub checksum: String,
}

/// Resolves storage references to artifact bytes
#[derive(Debug, Clone)]
pub struct StorageResolver {
    client: reqwest::Client,
    max_artifact_bytes: usize,
}

impl StorageResolver {
    pub fn new(fetch_timeout: Duration, max_artifact_bytes: usize) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| LoadError::Unreachable {
                reference: "http client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            max_artifact_bytes,
        })
    }

    /// Fetch and verify the artifact behind `reference`
    ///
    /// Accepted forms are `file:///path`, a bare path and `http(s)://` URLs.
    /// A `#sha256=<hex>` fragment pins the expected digest.
    pub async fn fetch(&self, reference: &str) -> Result<FetchedArtifact, LoadError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LoadError::InvalidReference {
                reference: reference.to_string(),
                reason: "empty reference".to_string(),
            });
        }

        let (location, pinned) = split_checksum(reference)?;

        let (bytes, resolved) = if location.contains("://") {
            let url = Url::parse(location).map_err(|e| LoadError::InvalidReference {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;

            match url.scheme() {
                "file" => {
                    let path = url.to_file_path().map_err(|_| LoadError::InvalidReference {
                        reference: reference.to_string(),
                        reason: "not a local file path".to_string(),
                    })?;
                    self.read_file(&path).await?
                }
                "http" | "https" => self.read_http(url).await?,
                other => return Err(LoadError::UnsupportedScheme(other.to_string())),
            }
        } else {
            self.read_file(Path::new(location)).await?
        };

        let checksum = compute_checksum(&bytes);
        if let Some(expected) = pinned {
            if !expected.eq_ignore_ascii_case(&checksum) {
                return Err(LoadError::ChecksumMismatch {
                    expected,
                    actual: checksum,
                });
            }
        }

        debug!(
            location = %resolved,
            size = bytes.len(),
            checksum = %checksum,
            "Fetched detector artifact"
        );

        Ok(FetchedArtifact {
            bytes,
            location: resolved,
            checksum,
        })
    }

    async fn read_file(&self, path: &Path) -> Result<(Vec<u8>, String), LoadError> {
        let unreachable = |path: &Path, e: std::io::Error| LoadError::Unreachable {
            reference: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut path: PathBuf = path.to_path_buf();
        let mut metadata = tokio::fs::metadata(&path).await.map_err(|e| unreachable(&path, e))?;

        if metadata.is_dir() {
            path = path.join(ARTIFACT_FILE_NAME);
            metadata = tokio::fs::metadata(&path).await.map_err(|e| unreachable(&path, e))?;
        }

        self.check_size(metadata.len() as usize)?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| unreachable(&path, e))?;
        self.check_size(bytes.len())?;

        Ok((bytes, path.display().to_string()))
    }

    async fn read_http(&self, mut url: Url) -> Result<(Vec<u8>, String), LoadError> {
        if url.path().ends_with('/') {
            url = url.join(ARTIFACT_FILE_NAME).map_err(|e| LoadError::InvalidReference {
                reference: url.to_string(),
                reason: e.to_string(),
            })?;
        }

        let unreachable = |reason: String| LoadError::Unreachable {
            reference: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP status {}", response.status())));
        }

        if let Some(length) = response.content_length() {
            self.check_size(length as usize)?;
        }

        let bytes = response.bytes().await.map_err(|e| unreachable(e.to_string()))?;
        self.check_size(bytes.len())?;

        Ok((bytes.to_vec(), url.to_string()))
    }

    fn check_size(&self, size: usize) -> Result<(), LoadError> {
        if size > self.max_artifact_bytes {
            return Err(LoadError::TooLarge {
                size,
                max: self.max_artifact_bytes,
            });
        }
        Ok(())
    }
}

/// Split `location#sha256=<hex>` into its parts
fn split_checksum(reference: &str) -> Result<(&str, Option<String>), LoadError> {
    let Some((location, fragment)) = reference.split_once('#') else {
        return Ok((reference, None));
    };

    let digest = fragment
        .strip_prefix(CHECKSUM_FRAGMENT)
        .filter(|d| d.len() == 64 && d.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| LoadError::InvalidReference {
            reference: reference.to_string(),
            reason: "fragment must be sha256=<64 hex chars>".to_string(),
        })?;

    Ok((location, Some(digest.to_ascii_lowercase())))
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

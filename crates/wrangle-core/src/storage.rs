//! Object storage access for `s3://bucket/key` locations.
//!
//! One `object_store` client is kept per bucket. Backends:
//! - S3 via `AmazonS3Builder` (region, explicit credentials, custom endpoint)
//! - local filesystem (`<root>/<bucket>/<key>`) for development
//! - in-memory for tests
//!
//! Existence polling blocks the caller until every path reaches the wanted state
//! or the timeout elapses.

use crate::config::{AwsConfig, StorageBackend, StorageConfig};
use crate::{Error, Result};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Header S3 returns with the bucket's region, even on redirects and 403s.
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Parsed `s3://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Path {
    /// Bucket name
    pub bucket: String,
    /// Object key or prefix (may be empty)
    pub key: String,
}

impl S3Path {
    /// Parse an `s3://bucket/key` string.
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path.strip_prefix("s3://").ok_or_else(|| {
            Error::invalid_value(format!("'{}' is not a valid path (expected s3://bucket/key)", path))
        })?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::invalid_value(format!(
                "'{}' has no bucket name",
                path
            )));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn object_path(&self) -> ObjectPath {
        ObjectPath::from(self.key.as_str())
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Ensure a dataset root ends with `/`.
pub fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Object storage shared by every operation of a session.
pub struct ObjectStorage {
    backend: StorageBackend,
    aws: AwsConfig,
    local_root: Option<std::path::PathBuf>,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    concurrency: usize,
    wait_timeout: Duration,
    wait_poll_interval: Duration,
}

impl ObjectStorage {
    /// Create storage from configuration.
    pub fn new(aws: &AwsConfig, config: &StorageConfig) -> Self {
        Self {
            backend: config.backend,
            aws: aws.clone(),
            local_root: config.local_root.clone(),
            stores: DashMap::new(),
            concurrency: config.concurrency,
            wait_timeout: Duration::from_secs(config.wait_timeout_seconds),
            wait_poll_interval: Duration::from_millis(config.wait_poll_interval_ms),
        }
    }

    /// In-memory storage, one `InMemory` store per bucket.
    pub fn in_memory() -> Self {
        Self::new(
            &AwsConfig::default(),
            &StorageConfig {
                backend: StorageBackend::Memory,
                wait_poll_interval_ms: 10,
                wait_timeout_seconds: 5,
                ..StorageConfig::default()
            },
        )
    }

    /// Register an explicit store for a bucket.
    pub fn with_store(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    /// Bound on concurrent object operations.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(store.clone());
        }
        let store = match self.backend {
            StorageBackend::S3 => self.create_s3_store(bucket)?,
            StorageBackend::Local => self.create_local_store(bucket)?,
            StorageBackend::Memory => Arc::new(object_store::memory::InMemory::new()),
        };
        // Another task may have raced us; keep whichever landed first.
        Ok(self
            .stores
            .entry(bucket.to_string())
            .or_insert(store)
            .clone())
    }

    fn create_s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.aws.region);

        if let Some(ref access_key) = self.aws.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(ref secret_key) = self.aws.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(ref token) = self.aws.session_token {
            builder = builder.with_token(token);
        }

        if let Some(ref endpoint) = self.aws.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create S3 store for {}: {}", bucket, e)))?;

        Ok(Arc::new(store))
    }

    fn create_local_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        use object_store::local::LocalFileSystem;

        let root = self
            .local_root
            .as_ref()
            .ok_or_else(|| Error::Config("local storage requires local_root".into()))?;
        let path = root.join(bucket);

        // Each bucket maps to a directory under local_root
        if !path.exists() {
            std::fs::create_dir_all(&path).map_err(|e| {
                Error::Storage(format!("Failed to create local bucket directory: {}", e))
            })?;
        }

        let store = LocalFileSystem::new_with_prefix(&path).map_err(|e| {
            Error::Storage(format!("Failed to create local file system store: {}", e))
        })?;

        Ok(Arc::new(store))
    }

    /// Write one object.
    pub async fn put(&self, location: &str, data: Bytes) -> Result<()> {
        let path = S3Path::parse(location)?;
        let size = data.len();
        self.store(&path.bucket)?
            .put(&path.object_path(), PutPayload::from_bytes(data))
            .await
            .map_err(|e| Error::Storage(format!("Failed to upload file to {}: {}", location, e)))?;

        debug!(path = %location, size_bytes = size, "Uploaded object");
        Ok(())
    }

    /// Read one object.
    pub async fn read(&self, location: &str) -> Result<Bytes> {
        let path = S3Path::parse(location)?;
        let result = self
            .store(&path.bucket)?
            .get(&path.object_path())
            .await
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", location, e)))?;
        Ok(result.bytes().await?)
    }

    /// List object locations under a prefix, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.list_with_size(prefix).await?.into_keys().collect())
    }

    /// Total size in bytes of each object under a prefix.
    pub async fn size(&self, prefix: &str) -> Result<BTreeMap<String, u64>> {
        self.list_with_size(prefix).await
    }

    async fn list_with_size(&self, prefix: &str) -> Result<BTreeMap<String, u64>> {
        let path = S3Path::parse(prefix)?;
        let store = self.store(&path.bucket)?;
        let object_prefix = (!path.key.is_empty()).then(|| path.object_path());

        let metas: Vec<_> = store
            .list(object_prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| Error::Storage(format!("Failed to list {}: {}", prefix, e)))?;

        Ok(metas
            .into_iter()
            .map(|m| (format!("s3://{}/{}", path.bucket, m.location), m.size as u64))
            .collect())
    }

    /// Whether an object exists.
    pub async fn exists(&self, location: &str) -> Result<bool> {
        let path = S3Path::parse(location)?;
        match self.store(&path.bucket)?.head(&path.object_path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::Storage(format!(
                "Failed to check {}: {}",
                location, e
            ))),
        }
    }

    /// Delete objects. Missing objects are not an error.
    pub async fn delete(&self, locations: &[String]) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        let parsed = locations
            .iter()
            .map(|l| S3Path::parse(l))
            .collect::<Result<Vec<_>>>()?;

        stream::iter(parsed)
            .map(|path| async move {
                let store = self.store(&path.bucket)?;
                match store.delete(&path.object_path()).await {
                    Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                    Err(e) => Err(Error::Storage(format!("Failed to delete {}: {}", path, e))),
                }
            })
            .buffer_unordered(self.concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        debug!(count = locations.len(), "Deleted objects");
        Ok(())
    }

    /// Delete every object under a prefix. Returns the deleted locations.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let existing = self.list(prefix).await?;
        self.delete(&existing).await?;
        if !existing.is_empty() {
            info!(prefix = %prefix, count = existing.len(), "Deleted objects under prefix");
        }
        Ok(existing)
    }

    /// Wait until every path exists.
    pub async fn wait_objects_exist(&self, paths: &[String]) -> Result<()> {
        self.wait_objects(paths, true).await
    }

    /// Wait until no path exists.
    pub async fn wait_objects_not_exist(&self, paths: &[String]) -> Result<()> {
        self.wait_objects(paths, false).await
    }

    async fn wait_objects(&self, paths: &[String], want_exists: bool) -> Result<()> {
        stream::iter(paths.iter())
            .map(|path| self.wait_object(path, want_exists))
            .buffer_unordered(self.concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn wait_object(&self, path: &str, want_exists: bool) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if self.exists(path).await? == want_exists {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Storage(format!(
                    "Timed out after {:?} waiting for {} to {}",
                    self.wait_timeout,
                    path,
                    if want_exists { "exist" } else { "disappear" }
                )));
            }
            tokio::time::sleep(self.wait_poll_interval).await;
        }
    }

    /// Region a bucket lives in.
    ///
    /// Non-S3 backends report the configured region.
    pub async fn bucket_region(&self, bucket: &str) -> Result<String> {
        if self.backend != StorageBackend::S3 || self.aws.s3_endpoint.is_some() {
            return Ok(self.aws.region.clone());
        }

        let url = format!("https://{}.s3.amazonaws.com", bucket);
        let response = reqwest::Client::new()
            .head(&url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Failed to resolve region of {}: {}", bucket, e)))?;

        response
            .headers()
            .get(BUCKET_REGION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Storage(format!("Bucket {} reported no region", bucket)))
    }
}

//! Configuration structures for wrangle.
//!
//! Loaded from a TOML file. Per-call options (query workgroup, write compression)
//! override the defaults set here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// AWS region and credentials
    #[serde(default)]
    pub aws: AwsConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Athena query configuration
    #[serde(default)]
    pub athena: AthenaConfig,

    /// Dataset write defaults
    #[serde(default)]
    pub write: WriteConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// AWS region and credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Explicit access key (default credential chain when unset)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Explicit secret key
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,

    /// Custom S3 endpoint (MinIO, LocalStack)
    #[serde(default)]
    pub s3_endpoint: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            s3_endpoint: None,
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the local backend (one sub-directory per bucket)
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Maximum concurrent object operations (partition writes, deletes, polls)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for existence polling
    #[serde(default = "default_wait_timeout_seconds")]
    pub wait_timeout_seconds: u64,

    /// Interval between existence polls
    #[serde(default = "default_wait_poll_interval_ms")]
    pub wait_poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_root: None,
            concurrency: default_concurrency(),
            wait_timeout_seconds: default_wait_timeout_seconds(),
            wait_poll_interval_ms: default_wait_poll_interval_ms(),
        }
    }
}

/// Storage backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 (default)
    #[default]
    S3,
    /// Local filesystem
    Local,
    /// In-memory, lost on exit
    Memory,
}

/// Catalog configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog backend
    #[serde(default)]
    pub backend: CatalogBackend,

    /// Glue catalog ID (defaults to AWS account ID)
    #[serde(default)]
    pub catalog_id: Option<String>,
}

/// Catalog backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    /// AWS Glue Data Catalog (default)
    #[default]
    Glue,
    /// In-memory catalog
    Memory,
}

/// Athena query configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AthenaConfig {
    /// Workgroup
    #[serde(default = "default_workgroup")]
    pub workgroup: String,

    /// Default query output location (s3://bucket/prefix/)
    #[serde(default)]
    pub s3_output: Option<String>,

    /// Result encryption
    #[serde(default)]
    pub encryption: Option<EncryptionOption>,

    /// KMS key for sse_kms / cse_kms
    #[serde(default)]
    pub kms_key: Option<String>,

    /// First status poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Poll interval ceiling for backoff
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Maximum age of a reusable cached execution (0 disables the cache)
    #[serde(default)]
    pub max_cache_seconds: u64,

    /// How many recent executions the cache inspects
    #[serde(default = "default_max_cache_query_inspections")]
    pub max_cache_query_inspections: usize,

    /// Materialize results through a temporary CTAS table
    #[serde(default = "default_true")]
    pub ctas_approach: bool,

    /// Keep CTAS result files after they are consumed
    #[serde(default = "default_true")]
    pub keep_files: bool,
}

impl Default for AthenaConfig {
    fn default() -> Self {
        Self {
            workgroup: default_workgroup(),
            s3_output: None,
            encryption: None,
            kms_key: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            max_cache_seconds: 0,
            max_cache_query_inspections: default_max_cache_query_inspections(),
            ctas_approach: true,
            keep_files: true,
        }
    }
}

/// Query result encryption.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionOption {
    /// S3 managed keys
    SseS3,
    /// KMS managed keys, server side
    SseKms,
    /// KMS managed keys, client side
    CseKms,
}

impl EncryptionOption {
    /// Whether a KMS key must accompany this option.
    pub fn requires_kms_key(&self) -> bool {
        matches!(self, EncryptionOption::SseKms | EncryptionOption::CseKms)
    }
}

/// Dataset write defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WriteConfig {
    /// Default compression codec name
    #[serde(default)]
    pub compression: Option<String>,

    /// Keep catalog versions on table redefinition
    #[serde(default)]
    pub catalog_versioning: bool,

    /// Sanitize column names on non-catalog writes
    #[serde(default)]
    pub sanitize_columns: bool,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string for an env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_concurrency() -> usize {
    8
}
fn default_wait_timeout_seconds() -> u64 {
    30
}
fn default_wait_poll_interval_ms() -> u64 {
    500
}
fn default_workgroup() -> String {
    "primary".to_string()
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_poll_interval_ms() -> u64 {
    5000
}
fn default_max_cache_query_inspections() -> usize {
    50
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.aws.region.is_empty() {
            return Err(crate::Error::Config("AWS region is required".into()));
        }

        if self.storage.concurrency == 0 {
            return Err(crate::Error::Config(
                "storage.concurrency must be at least 1".into(),
            ));
        }

        if self.storage.backend == StorageBackend::Local && self.storage.local_root.is_none() {
            return Err(crate::Error::Config(
                "storage.local_root is required for the local backend".into(),
            ));
        }

        if self.athena.max_cache_query_inspections == 0 {
            return Err(crate::Error::Config(
                "athena.max_cache_query_inspections must be at least 1".into(),
            ));
        }

        if let Some(encryption) = self.athena.encryption {
            if encryption.requires_kms_key() && self.athena.kms_key.is_none() {
                return Err(crate::Error::Config(format!(
                    "athena.kms_key is required for {:?} encryption",
                    encryption
                )));
            }
        }

        if let Some(ref output) = self.athena.s3_output {
            crate::storage::S3Path::parse(output)
                .map_err(|e| crate::Error::Config(format!("athena.s3_output: {}", e)))?;
        }

        if self.athena.poll_interval_ms > self.athena.max_poll_interval_ms {
            tracing::warn!(
                poll_interval_ms = self.athena.poll_interval_ms,
                max_poll_interval_ms = self.athena.max_poll_interval_ms,
                "Poll interval exceeds its ceiling, backoff is disabled"
            );
        }

        Ok(())
    }
}

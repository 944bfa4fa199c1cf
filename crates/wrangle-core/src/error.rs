//! Error types for wrangle core library.
//!
//! Errors are split into two categories:
//! - [`ValidationError`]: local, synchronous failures raised before any physical side effect
//! - remote failures ([`CatalogError`], [`QueryError`], storage) carrying the service diagnostic
//!
//! Remote failures are propagated as-is, never retried inside the library.

use thiserror::Error;

/// Result type alias for wrangle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for wrangle.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Catalog-related error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Query service error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Arrow, parquet or CSV encode/decode error
    #[error("Codec error: {0}")]
    Codec(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Validation errors. Always raised before anything is written or deleted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A recognized parameter received an unrecognized value
    #[error("Invalid argument value: {0}")]
    InvalidArgumentValue(String),

    /// Two individually valid parameters are mutually exclusive
    #[error("Invalid argument combination: {0}")]
    InvalidArgumentCombination(String),

    /// Wrong shape of input
    #[error("Invalid argument type: {0}")]
    InvalidArgumentType(String),

    /// Unsupported compression codec name
    #[error("Invalid compression: {0}")]
    InvalidCompression(String),

    /// Zero rows or zero columns supplied
    #[error("Empty dataframe: {0}")]
    EmptyDataFrame(String),

    /// Column type cannot be inferred (all values null)
    #[error("Undetected type: {0}")]
    UndetectedType(String),

    /// Column type has no representation on this path
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
}

/// Catalog errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Operation referenced a nonexistent table
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    /// Entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Partition filter expression could not be evaluated
    #[error("Invalid partition expression: {0}")]
    InvalidExpression(String),

    /// Remote catalog service failure
    #[error("Catalog service error: {0}")]
    Service(String),
}

/// Query service errors.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Execution reached the FAILED state
    #[error("Query {query_execution_id} failed: {reason}")]
    Failed {
        query_execution_id: String,
        reason: String,
    },

    /// Execution reached the CANCELLED state
    #[error("Query {query_execution_id} was cancelled")]
    Cancelled { query_execution_id: String },

    /// Remote query service failure
    #[error("Query service error: {0}")]
    Service(String),
}

impl Error {
    /// True for local validation failures (no side effect happened).
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Shorthand for an `InvalidArgumentValue` validation error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::InvalidArgumentValue(msg.into()))
    }

    /// Shorthand for an `InvalidArgumentCombination` validation error.
    pub fn invalid_combination(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::InvalidArgumentCombination(msg.into()))
    }

    /// Shorthand for an `UnsupportedType` validation error.
    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::UnsupportedType(msg.into()))
    }
}

// Third-party errors

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

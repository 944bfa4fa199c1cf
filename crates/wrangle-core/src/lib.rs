//! Wrangle Core - dataset writes, catalog reconciliation and Athena queries over S3
//!
//! This library provides:
//!
//! - Parquet and CSV dataset writes with overwrite, append and
//!   overwrite-partitions modes over Hive-style partition layouts
//! - Glue catalog reconciliation: schema merges, table parameters, column
//!   comments, partition registration and versioned overwrites
//! - Athena query execution with result caching, CTAS materialization and
//!   chunked result streams

pub mod athena;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod schema;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{CatalogError, QueryError, ValidationError};
pub use error::{Error, Result};
pub use session::Session;

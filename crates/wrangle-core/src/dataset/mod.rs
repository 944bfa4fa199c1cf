//! Dataset writes.
//!
//! This module provides:
//! - [`WriteOptions`] / [`WriteMode`]: validated write arguments
//! - [`partition`]: partition indexing of a batch
//! - [`reconcile`]: schema and metadata reconciliation against the catalog
//! - [`DatasetWriter`]: orchestrates validation, physical writes and catalog sync

mod options;
pub mod partition;
pub mod reconcile;
mod writer;

pub use options::{WriteMode, WriteOptions, WriteOptionsBuilder, WriteResult};
pub use partition::{derive_partitions, PartitionSlice, NULL_PARTITION_VALUE};
pub use reconcile::{reconcile, MetadataUpdate, ReconciledState};
pub use writer::DatasetWriter;

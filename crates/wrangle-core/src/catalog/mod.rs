//! Metadata catalog access.
//!
//! This module provides:
//! - [`Catalog`]: the catalog service interface (databases, tables, partitions)
//! - [`GlueCatalogClient`]: AWS Glue Data Catalog implementation
//! - [`MemoryCatalog`]: in-process implementation for tests and local runs
//! - [`CatalogSynchronizer`]: applies reconciled table state and exposes the
//!   parameter/comment/partition operations built on top of the interface

mod glue;
mod memory;
mod sync;

pub use glue::GlueCatalogClient;
pub use memory::MemoryCatalog;
pub(crate) use sync::serde_parameters;
pub use sync::{
    storage_parameters, CatalogSynchronizer, CreateTableMode, TableRequest, CSV_INPUT_FORMAT,
    CSV_OUTPUT_FORMAT, CSV_SERDE, PARQUET_INPUT_FORMAT, PARQUET_OUTPUT_FORMAT, PARQUET_SERDE,
};

use crate::codec::FileFormat;
use crate::schema::TableSchema;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Partition location -> ordered partition values.
pub type PartitionMap = BTreeMap<String, Vec<String>>;

/// Monotonically increasing table definition version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableVersion(pub u64);

impl TableVersion {
    /// The version following this one.
    pub fn next(&self) -> Self {
        TableVersion(self.0 + 1)
    }
}

impl fmt::Display for TableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database summary.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseInfo {
    /// Database name
    pub name: String,
    /// Description, if any
    pub description: Option<String>,
}

/// A catalog table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    /// Database name
    pub database: String,
    /// Table name
    pub name: String,
    /// Backing location (s3://bucket/prefix/)
    pub location: String,
    /// Storage format
    pub format: FileFormat,
    /// Regular and partition columns
    pub schema: TableSchema,
    /// Column comments keyed by column name
    pub comments: HashMap<String, String>,
    /// Table parameters
    pub parameters: HashMap<String, String>,
    /// SerDe parameters (delimiter for CSV tables)
    pub serde_parameters: HashMap<String, String>,
    /// Table description
    pub description: Option<String>,
    /// Current version (ignored on input)
    pub version: TableVersion,
}

impl TableDefinition {
    /// Create an empty definition.
    pub fn new(
        database: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
        format: FileFormat,
    ) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            location: location.into(),
            format,
            schema: TableSchema::default(),
            comments: HashMap::new(),
            parameters: HashMap::new(),
            serde_parameters: HashMap::new(),
            description: None,
            version: TableVersion::default(),
        }
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Set the parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Column name -> type string, partition columns included.
    pub fn column_types(&self) -> BTreeMap<String, String> {
        self.schema
            .columns
            .iter()
            .chain(self.schema.partitions.iter())
            .map(|c| (c.name.clone(), c.column_type.to_string()))
            .collect()
    }
}

/// Table name filter. At most two of prefix, suffix and substring may be combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableNameFilter {
    prefix: Option<String>,
    suffix: Option<String>,
    contains: Option<String>,
}

impl TableNameFilter {
    /// Build a filter; all three parts together is `InvalidArgumentCombination`.
    pub fn new(
        prefix: Option<&str>,
        suffix: Option<&str>,
        contains: Option<&str>,
    ) -> Result<Self> {
        if prefix.is_some() && suffix.is_some() && contains.is_some() {
            return Err(Error::invalid_combination(
                "name_prefix, name_suffix and name_contains cannot be combined in one call",
            ));
        }
        Ok(Self {
            prefix: prefix.map(str::to_string),
            suffix: suffix.map(str::to_string),
            contains: contains.map(str::to_string),
        })
    }

    /// Filter matching every name.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether a table name passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        self.prefix.as_deref().map_or(true, |p| name.starts_with(p))
            && self.suffix.as_deref().map_or(true, |s| name.ends_with(s))
            && self.contains.as_deref().map_or(true, |c| name.contains(c))
    }

    /// Glue `GetTables` expression, `None` when unfiltered.
    pub fn glue_expression(&self) -> Option<String> {
        match (&self.prefix, &self.suffix, &self.contains) {
            (None, None, None) => None,
            (Some(p), Some(s), None) => Some(format!("{}.*{}", p, s)),
            (Some(p), None, Some(c)) => Some(format!("{}.*{}.*", p, c)),
            (None, Some(s), Some(c)) => Some(format!(".*{}.*{}", c, s)),
            (Some(p), None, None) => Some(format!("{}.*", p)),
            (None, Some(s), None) => Some(format!(".*{}", s)),
            (None, None, Some(c)) => Some(format!(".*{}.*", c)),
            (Some(_), Some(_), Some(_)) => None,
        }
    }
}

/// Metadata catalog service.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List databases.
    async fn databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Create a database. With `exist_ok`, an existing database is not an error.
    async fn create_database(
        &self,
        name: &str,
        description: Option<&str>,
        exist_ok: bool,
    ) -> Result<()>;

    /// Delete a database and its tables.
    async fn delete_database(&self, name: &str) -> Result<()>;

    /// List tables of one database (or all) whose names pass `filter`.
    async fn get_tables(
        &self,
        database: Option<&str>,
        filter: &TableNameFilter,
    ) -> Result<Vec<TableDefinition>>;

    /// Free-text search over table names, descriptions, columns and parameters.
    async fn search_tables(&self, text: &str) -> Result<Vec<TableDefinition>>;

    /// Load a table, `None` when it does not exist.
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableDefinition>>;

    /// Create a table.
    async fn create_table(&self, table: &TableDefinition) -> Result<TableVersion>;

    /// Replace a table definition in place. With `archive`, the previous definition
    /// is kept as an older version.
    async fn update_table(&self, table: &TableDefinition, archive: bool) -> Result<TableVersion>;

    /// Delete a table. Returns whether it existed.
    async fn delete_table(&self, database: &str, table: &str) -> Result<bool>;

    /// Register partitions (location -> values). Existing keys are overwritten.
    async fn upsert_partitions(
        &self,
        table: &TableDefinition,
        partitions: &PartitionMap,
    ) -> Result<()>;

    /// List partitions, optionally filtered by a catalog-side expression.
    async fn get_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
    ) -> Result<PartitionMap>;

    /// Remove partitions by their values.
    async fn delete_partitions(
        &self,
        database: &str,
        table: &str,
        values: &[Vec<String>],
    ) -> Result<()>;
}

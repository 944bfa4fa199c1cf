//! Catalog synchronization.
//!
//! Applies table definitions, partitions, parameters and comments to a [`Catalog`],
//! and exposes the read helpers built on top of it. Every operation is an
//! idempotent upsert unless it says otherwise.

use crate::catalog::{Catalog, PartitionMap, TableDefinition, TableVersion};
use crate::codec::{Compression, FileFormat};
use crate::error::CatalogError;
use crate::schema::{SchemaColumn, TableSchema};
use crate::storage::ensure_trailing_slash;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Hive parquet input format.
pub const PARQUET_INPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";
/// Hive parquet output format.
pub const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";
/// Hive parquet SerDe.
pub const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";
/// Hive text input format.
pub const CSV_INPUT_FORMAT: &str = "org.apache.hadoop.mapred.TextInputFormat";
/// Hive text output format.
pub const CSV_OUTPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat";
/// Hive delimited text SerDe.
pub const CSV_SERDE: &str = "org.apache.hadoop.hive.serde2.lazy.LazySimpleSerDe";

/// Table parameters describing how the backing files are stored.
pub fn storage_parameters(
    format: FileFormat,
    compression: Compression,
    delimiter: u8,
) -> HashMap<String, String> {
    let mut params = HashMap::from([
        ("classification".to_string(), format.to_string()),
        ("compressionType".to_string(), compression.as_str().to_string()),
        ("typeOfData".to_string(), "file".to_string()),
    ]);
    if format == FileFormat::Csv {
        params.insert("delimiter".into(), (delimiter as char).to_string());
        params.insert("columnsOrdered".into(), "true".into());
        params.insert("areColumnsQuoted".into(), "false".into());
    }
    params
}

/// SerDe parameters for a storage format.
pub(crate) fn serde_parameters(format: FileFormat, delimiter: u8) -> HashMap<String, String> {
    match format {
        FileFormat::Parquet => HashMap::from([("serialization.format".into(), "1".into())]),
        FileFormat::Csv => HashMap::from([
            ("field.delim".into(), (delimiter as char).to_string()),
            ("escape.delim".into(), "\\".into()),
        ]),
    }
}

/// How `create_parquet_table` / `create_csv_table` treat an existing table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateTableMode {
    /// Replace the definition
    #[default]
    Overwrite,
    /// Only add columns; existing column types must not change
    Append,
}

impl std::str::FromStr for CreateTableMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(CreateTableMode::Overwrite),
            "append" => Ok(CreateTableMode::Append),
            other => Err(Error::invalid_value(format!(
                "'{}' is not a valid table creation mode (overwrite, append)",
                other
            ))),
        }
    }
}

/// Explicit table definition request.
#[derive(Debug, Clone)]
pub struct TableRequest {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Backing location
    pub path: String,
    /// Regular column types
    pub columns: Vec<SchemaColumn>,
    /// Partition column types, in path order
    pub partitions: Vec<SchemaColumn>,
    /// Codec of the backing files
    pub compression: Option<String>,
    /// Table description
    pub description: Option<String>,
    /// Extra table parameters
    pub parameters: HashMap<String, String>,
    /// Column comments
    pub columns_comments: HashMap<String, String>,
    /// Replace or extend an existing table
    pub mode: CreateTableMode,
    /// Archive the previous definition when replacing it
    pub catalog_versioning: bool,
    /// CSV field delimiter
    pub delimiter: u8,
}

impl TableRequest {
    /// Create a request with no columns.
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            path: path.into(),
            columns: Vec::new(),
            partitions: Vec::new(),
            compression: None,
            description: None,
            parameters: HashMap::new(),
            columns_comments: HashMap::new(),
            mode: CreateTableMode::default(),
            catalog_versioning: false,
            delimiter: b',',
        }
    }

    /// Set regular and partition column types.
    pub fn with_schema(mut self, columns: Vec<SchemaColumn>, partitions: Vec<SchemaColumn>) -> Self {
        self.columns = columns;
        self.partitions = partitions;
        self
    }

    /// Set the codec name.
    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set extra parameters.
    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set column comments.
    pub fn with_columns_comments(mut self, comments: HashMap<String, String>) -> Self {
        self.columns_comments = comments;
        self
    }

    /// Set the creation mode.
    pub fn with_mode(mut self, mode: CreateTableMode) -> Self {
        self.mode = mode;
        self
    }

    /// Archive replaced definitions.
    pub fn with_catalog_versioning(mut self, enabled: bool) -> Self {
        self.catalog_versioning = enabled;
        self
    }

    /// Set the CSV delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Applies table state to a catalog.
#[derive(Clone)]
pub struct CatalogSynchronizer {
    catalog: Arc<dyn Catalog>,
}

impl CatalogSynchronizer {
    /// Create a synchronizer over a catalog.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// The underlying catalog.
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Persist a table definition.
    ///
    /// With `replace`, the table is redefined in place and its partitions are
    /// dropped; the previous definition is archived when `archive` is set. Without
    /// `replace`, an existing table is updated in place and a missing one created.
    /// The table version never goes backwards.
    pub async fn apply_definition(
        &self,
        definition: &TableDefinition,
        existing: Option<&TableDefinition>,
        replace: bool,
        archive: bool,
    ) -> Result<TableVersion> {
        let Some(existing) = existing else {
            return self.catalog.create_table(definition).await;
        };

        if !replace {
            return self.catalog.update_table(definition, archive).await;
        }

        let version = self.catalog.update_table(definition, archive).await?;
        let stale: Vec<Vec<String>> = self
            .catalog
            .get_partitions(&existing.database, &existing.name, None)
            .await?
            .into_values()
            .collect();
        if !stale.is_empty() {
            self.catalog
                .delete_partitions(&existing.database, &existing.name, &stale)
                .await?;
        }
        info!(
            table = %definition.qualified_name(),
            version = %version,
            archived = archive,
            dropped_partitions = stale.len(),
            "Redefined table"
        );
        Ok(version)
    }

    /// Register partitions of a table. Safe to repeat for the same keys.
    pub async fn add_partitions(
        &self,
        table: &TableDefinition,
        partitions: &PartitionMap,
    ) -> Result<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let normalized: PartitionMap = partitions
            .iter()
            .map(|(location, values)| (ensure_trailing_slash(location), values.clone()))
            .collect();
        debug!(
            table = %table.qualified_name(),
            count = normalized.len(),
            "Upserting partitions"
        );
        self.catalog.upsert_partitions(table, &normalized).await
    }

    /// Register partitions of a parquet table.
    pub async fn add_parquet_partitions(
        &self,
        database: &str,
        table: &str,
        partitions: &PartitionMap,
        compression: Option<&str>,
    ) -> Result<()> {
        self.add_format_partitions(database, table, FileFormat::Parquet, partitions, compression, b',')
            .await
    }

    /// Register partitions of a CSV table.
    pub async fn add_csv_partitions(
        &self,
        database: &str,
        table: &str,
        partitions: &PartitionMap,
        compression: Option<&str>,
        delimiter: u8,
    ) -> Result<()> {
        self.add_format_partitions(database, table, FileFormat::Csv, partitions, compression, delimiter)
            .await
    }

    async fn add_format_partitions(
        &self,
        database: &str,
        table: &str,
        format: FileFormat,
        partitions: &PartitionMap,
        compression: Option<&str>,
        delimiter: u8,
    ) -> Result<()> {
        let compression = Compression::resolve(compression, format)?;
        let mut definition = self.require_table(database, table).await?;
        definition.format = format;
        definition
            .parameters
            .extend(storage_parameters(format, compression, delimiter));
        definition.serde_parameters = serde_parameters(format, delimiter);
        self.add_partitions(&definition, partitions).await
    }

    /// Partitions of a parquet table, optionally filtered by a catalog expression.
    pub async fn get_parquet_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
    ) -> Result<PartitionMap> {
        self.catalog.get_partitions(database, table, expression).await
    }

    /// Partitions of a CSV table, optionally filtered by a catalog expression.
    pub async fn get_csv_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
    ) -> Result<PartitionMap> {
        self.catalog.get_partitions(database, table, expression).await
    }

    /// Remove partitions by their values.
    pub async fn delete_partitions(
        &self,
        database: &str,
        table: &str,
        values: &[Vec<String>],
    ) -> Result<()> {
        self.catalog.delete_partitions(database, table, values).await
    }

    /// Whether a table exists.
    pub async fn does_table_exist(&self, database: &str, table: &str) -> Result<bool> {
        Ok(self.catalog.get_table(database, table).await?.is_some())
    }

    /// Delete a table; returns whether it existed.
    pub async fn delete_table_if_exists(&self, database: &str, table: &str) -> Result<bool> {
        self.catalog.delete_table(database, table).await
    }

    /// Column name -> type string, `None` when the table does not exist.
    pub async fn get_table_types(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .catalog
            .get_table(database, table)
            .await?
            .map(|t| t.column_types()))
    }

    /// Backing location of a table.
    pub async fn get_table_location(&self, database: &str, table: &str) -> Result<String> {
        Ok(self.require_table(database, table).await?.location)
    }

    /// Table description.
    pub async fn get_table_description(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Option<String>> {
        Ok(self.require_table(database, table).await?.description)
    }

    /// Column comments.
    pub async fn get_columns_comments(
        &self,
        database: &str,
        table: &str,
    ) -> Result<HashMap<String, String>> {
        Ok(self.require_table(database, table).await?.comments)
    }

    /// Table parameters.
    pub async fn get_table_parameters(
        &self,
        database: &str,
        table: &str,
    ) -> Result<HashMap<String, String>> {
        Ok(self.require_table(database, table).await?.parameters)
    }

    /// Merge parameters into a table's parameters; keys not mentioned are kept.
    pub async fn upsert_table_parameters(
        &self,
        database: &str,
        table: &str,
        parameters: &HashMap<String, String>,
        catalog_versioning: bool,
    ) -> Result<HashMap<String, String>> {
        let mut definition = self.require_table(database, table).await?;
        definition
            .parameters
            .extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.catalog
            .update_table(&definition, catalog_versioning)
            .await?;
        Ok(definition.parameters)
    }

    /// Replace a table's parameters; keys not present in `parameters` are removed.
    pub async fn overwrite_table_parameters(
        &self,
        database: &str,
        table: &str,
        parameters: &HashMap<String, String>,
        catalog_versioning: bool,
    ) -> Result<HashMap<String, String>> {
        let mut definition = self.require_table(database, table).await?;
        definition.parameters = parameters.clone();
        self.catalog
            .update_table(&definition, catalog_versioning)
            .await?;
        Ok(definition.parameters)
    }

    /// Register a parquet table from explicit types.
    pub async fn create_parquet_table(&self, request: &TableRequest) -> Result<TableVersion> {
        self.create_table(request, FileFormat::Parquet).await
    }

    /// Register a CSV table from explicit types.
    pub async fn create_csv_table(&self, request: &TableRequest) -> Result<TableVersion> {
        self.create_table(request, FileFormat::Csv).await
    }

    async fn create_table(&self, request: &TableRequest, format: FileFormat) -> Result<TableVersion> {
        let compression = Compression::resolve(request.compression.as_deref(), format)?;
        let existing = self
            .catalog
            .get_table(&request.database, &request.table)
            .await?;

        let mut parameters = storage_parameters(format, compression, request.delimiter);
        let mut comments = HashMap::new();
        let mut description = request.description.clone();
        let mut schema = TableSchema::new(request.columns.clone(), request.partitions.clone());

        if let (CreateTableMode::Append, Some(current)) = (request.mode, existing.as_ref()) {
            for column in request.columns.iter().chain(request.partitions.iter()) {
                if let Some(current_type) = current.schema.lookup(&column.name) {
                    if *current_type != column.column_type {
                        return Err(Error::invalid_value(format!(
                            "Schema change detected: column '{}' is {} in {} and cannot become {}",
                            column.name,
                            current_type,
                            current.qualified_name(),
                            column.column_type
                        )));
                    }
                }
            }

            let mut columns = current.schema.columns.clone();
            for column in &request.columns {
                if current.schema.lookup(&column.name).is_none() {
                    columns.push(column.clone());
                }
            }
            schema = TableSchema::new(columns, current.schema.partitions.clone());
            parameters = current.parameters.clone();
            parameters.extend(storage_parameters(format, compression, request.delimiter));
            comments = current.comments.clone();
            description = description.or_else(|| current.description.clone());
        }

        parameters.extend(request.parameters.clone());
        comments.extend(request.columns_comments.clone());

        let mut definition = TableDefinition::new(
            &request.database,
            &request.table,
            ensure_trailing_slash(&request.path),
            format,
        )
        .with_schema(schema)
        .with_parameters(parameters)
        .with_description(description);
        definition.comments = comments;
        definition.serde_parameters = serde_parameters(format, request.delimiter);

        let replace = request.mode == CreateTableMode::Overwrite;
        self.apply_definition(
            &definition,
            existing.as_ref(),
            replace,
            request.catalog_versioning,
        )
        .await
    }

    async fn require_table(&self, database: &str, table: &str) -> Result<TableDefinition> {
        self.catalog
            .get_table(database, table)
            .await?
            .ok_or_else(|| CatalogError::InvalidTable(format!("{}.{}", database, table)).into())
    }
}

//! Glue Data Catalog backend.
//!
//! - Credentials come from the session's AWS settings or the default provider chain
//! - Tables are registered as `EXTERNAL_TABLE` with Hive parquet or text SerDes
//! - Archived updates (`SkipArchive = false`) keep previous table versions
//! - Partitions are created in batches; existing ones are updated in place

use crate::catalog::{
    Catalog, DatabaseInfo, PartitionMap, TableDefinition, TableNameFilter, TableVersion,
    CSV_INPUT_FORMAT, CSV_OUTPUT_FORMAT, CSV_SERDE, PARQUET_INPUT_FORMAT, PARQUET_OUTPUT_FORMAT,
    PARQUET_SERDE,
};
use crate::codec::FileFormat;
use crate::config::{AwsConfig, CatalogConfig};
use crate::error::CatalogError;
use crate::schema::{ColumnType, SchemaColumn, TableSchema};
use crate::storage::ensure_trailing_slash;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_glue::error::DisplayErrorContext;
use aws_sdk_glue::types::{
    BatchUpdatePartitionRequestEntry, Column, DatabaseInput, PartitionInput, PartitionValueList,
    SerDeInfo, StorageDescriptor, Table, TableInput,
};
use aws_sdk_glue::Client as GlueClient;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Glue accepts at most 100 partitions per batch create/update.
const PARTITION_BATCH_SIZE: usize = 100;

/// Glue accepts at most 25 partitions per batch delete.
const PARTITION_DELETE_BATCH_SIZE: usize = 25;

/// AWS Glue catalog client.
pub struct GlueCatalogClient {
    client: GlueClient,
    /// Catalog owner; the caller's account when unset
    catalog_id: Option<String>,
}

impl GlueCatalogClient {
    /// Connect to Glue with the session's AWS settings.
    pub async fn new(aws: &AwsConfig, config: &CatalogConfig) -> Result<Self> {
        let sdk_config = crate::session::load_sdk_config(aws).await;

        info!(region = %aws.region, "AWS Glue catalog client initialized");

        Ok(Self::from_client(
            GlueClient::new(&sdk_config),
            config.catalog_id.clone(),
        ))
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: GlueClient, catalog_id: Option<String>) -> Self {
        Self { client, catalog_id }
    }

    fn service_error(action: &str, err: impl std::error::Error) -> Error {
        Error::Catalog(CatalogError::Service(format!(
            "Failed to {}: {}",
            action,
            DisplayErrorContext(err)
        )))
    }

    fn is_not_found(err: &impl std::error::Error) -> bool {
        format!("{}", DisplayErrorContext(err)).contains("EntityNotFoundException")
    }

    fn is_already_exists(err: &impl std::error::Error) -> bool {
        format!("{}", DisplayErrorContext(err)).contains("AlreadyExistsException")
    }

    fn build_column(column: &SchemaColumn, comment: Option<&String>) -> Result<Column> {
        Column::builder()
            .name(&column.name)
            .r#type(column.column_type.to_string())
            .set_comment(comment.cloned())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build column: {}", e)))
    }

    /// Build storage descriptor for a table or partition location.
    fn build_storage_descriptor(
        table: &TableDefinition,
        location: &str,
        with_columns: bool,
    ) -> Result<StorageDescriptor> {
        let columns = if with_columns {
            table
                .schema
                .columns
                .iter()
                .map(|c| Self::build_column(c, table.comments.get(&c.name)))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let (input_format, output_format, serde) = match table.format {
            FileFormat::Parquet => (PARQUET_INPUT_FORMAT, PARQUET_OUTPUT_FORMAT, PARQUET_SERDE),
            FileFormat::Csv => (CSV_INPUT_FORMAT, CSV_OUTPUT_FORMAT, CSV_SERDE),
        };

        let compressed = table
            .parameters
            .get("compressionType")
            .is_some_and(|c| c != "none");

        Ok(StorageDescriptor::builder()
            .set_columns(Some(columns))
            .location(location)
            .input_format(input_format)
            .output_format(output_format)
            .compressed(compressed)
            .number_of_buckets(-1)
            .stored_as_sub_directories(false)
            .serde_info(
                SerDeInfo::builder()
                    .serialization_library(serde)
                    .set_parameters(Some(table.serde_parameters.clone()))
                    .build(),
            )
            .set_parameters(Some(table.parameters.clone()))
            .build())
    }

    fn build_table_input(table: &TableDefinition) -> Result<TableInput> {
        let partition_keys = table
            .schema
            .partitions
            .iter()
            .map(|c| Self::build_column(c, table.comments.get(&c.name)))
            .collect::<Result<Vec<_>>>()?;

        TableInput::builder()
            .name(&table.name)
            .set_description(table.description.clone())
            .storage_descriptor(Self::build_storage_descriptor(
                table,
                &table.location,
                true,
            )?)
            .set_partition_keys(Some(partition_keys))
            .set_parameters(Some(table.parameters.clone()))
            .table_type("EXTERNAL_TABLE")
            .build()
            .map_err(|e| Error::Config(format!("Failed to build table input: {}", e)))
    }

    fn parse_column(column: &Column) -> SchemaColumn {
        let raw = column.r#type().unwrap_or("string");
        let column_type = raw.parse::<ColumnType>().unwrap_or_else(|_| {
            warn!(column = %column.name(), glue_type = %raw, "Unrecognized Glue type, using string");
            ColumnType::String
        });
        SchemaColumn::new(column.name(), column_type)
    }

    /// Convert a Glue table to a table definition.
    fn glue_table_to_definition(table: &Table, database: &str) -> TableDefinition {
        let sd = table.storage_descriptor();
        let serde = sd.and_then(|sd| sd.serde_info());
        let format = match serde.and_then(|s| s.serialization_library()) {
            Some(lib) if lib.to_lowercase().contains("parquet") => FileFormat::Parquet,
            _ => FileFormat::Csv,
        };

        let sd_columns = sd.map(|sd| sd.columns()).unwrap_or_default();
        let mut comments = HashMap::new();
        for column in sd_columns.iter().chain(table.partition_keys().iter()) {
            if let Some(comment) = column.comment() {
                comments.insert(column.name().to_string(), comment.to_string());
            }
        }

        TableDefinition {
            database: table.database_name().unwrap_or(database).to_string(),
            name: table.name().to_string(),
            location: sd
                .and_then(|sd| sd.location())
                .map(ensure_trailing_slash)
                .unwrap_or_default(),
            format,
            schema: TableSchema::new(
                sd_columns.iter().map(Self::parse_column).collect(),
                table
                    .partition_keys()
                    .iter()
                    .map(Self::parse_column)
                    .collect(),
            ),
            comments,
            parameters: table.parameters().cloned().unwrap_or_default(),
            serde_parameters: serde
                .and_then(|s| s.parameters())
                .cloned()
                .unwrap_or_default(),
            description: table.description().map(str::to_string),
            version: TableVersion(
                table
                    .version_id()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            ),
        }
    }

    async fn update_partitions(
        &self,
        table: &TableDefinition,
        entries: Vec<(String, Vec<String>)>,
    ) -> Result<()> {
        for chunk in entries.chunks(PARTITION_BATCH_SIZE) {
            let mut requests = Vec::with_capacity(chunk.len());
            for (location, values) in chunk {
                let input = PartitionInput::builder()
                    .set_values(Some(values.clone()))
                    .storage_descriptor(Self::build_storage_descriptor(table, location, false)?)
                    .build();
                requests.push(
                    BatchUpdatePartitionRequestEntry::builder()
                        .set_partition_value_list(Some(values.clone()))
                        .partition_input(input)
                        .build()
                        .map_err(|e| {
                            Error::Config(format!("Failed to build partition update: {}", e))
                        })?,
                );
            }

            let output = self
                .client
                .batch_update_partition()
                .set_catalog_id(self.catalog_id.clone())
                .database_name(&table.database)
                .table_name(&table.name)
                .set_entries(Some(requests))
                .send()
                .await
                .map_err(|e| Self::service_error("update Glue partitions", e))?;

            if let Some(failure) = output.errors().first() {
                return Err(CatalogError::Service(format!(
                    "Failed to update partition {:?}: {:?}",
                    failure.partition_value_list(),
                    failure.error_detail().and_then(|d| d.error_message())
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for GlueCatalogClient {
    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let mut databases = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = self
                .client
                .get_databases()
                .set_catalog_id(self.catalog_id.clone())
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| Self::service_error("list Glue databases", e))?;

            databases.extend(output.database_list().iter().map(|db| DatabaseInfo {
                name: db.name().to_string(),
                description: db.description().map(str::to_string),
            }));

            match output.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(databases)
    }

    async fn create_database(
        &self,
        name: &str,
        description: Option<&str>,
        exist_ok: bool,
    ) -> Result<()> {
        let database_input = DatabaseInput::builder()
            .name(name)
            .set_description(description.map(str::to_string))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build database input: {}", e)))?;

        let result = self
            .client
            .create_database()
            .set_catalog_id(self.catalog_id.clone())
            .database_input(database_input)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(database = %name, "Created Glue database");
                Ok(())
            }
            Err(e) if Self::is_already_exists(&e) => {
                if exist_ok {
                    debug!(database = %name, "Glue database already exists");
                    Ok(())
                } else {
                    Err(CatalogError::AlreadyExists(format!("database {}", name)).into())
                }
            }
            Err(e) => Err(Self::service_error("create Glue database", e)),
        }
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        self.client
            .delete_database()
            .set_catalog_id(self.catalog_id.clone())
            .name(name)
            .send()
            .await
            .map_err(|e| Self::service_error("delete Glue database", e))?;

        info!(database = %name, "Deleted Glue database");
        Ok(())
    }

    async fn get_tables(
        &self,
        database: Option<&str>,
        filter: &TableNameFilter,
    ) -> Result<Vec<TableDefinition>> {
        let databases = match database {
            Some(name) => vec![name.to_string()],
            None => self.databases().await?.into_iter().map(|d| d.name).collect(),
        };

        let expression = filter.glue_expression();
        let mut tables = Vec::new();
        for db in databases {
            let mut token: Option<String> = None;
            loop {
                let output = self
                    .client
                    .get_tables()
                    .set_catalog_id(self.catalog_id.clone())
                    .database_name(&db)
                    .set_expression(expression.clone())
                    .set_next_token(token.take())
                    .send()
                    .await
                    .map_err(|e| Self::service_error("list Glue tables", e))?;

                tables.extend(
                    output
                        .table_list()
                        .iter()
                        .filter(|t| filter.matches(t.name()))
                        .map(|t| Self::glue_table_to_definition(t, &db)),
                );

                match output.next_token() {
                    Some(next) => token = Some(next.to_string()),
                    None => break,
                }
            }
        }
        Ok(tables)
    }

    async fn search_tables(&self, text: &str) -> Result<Vec<TableDefinition>> {
        let mut tables = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = self
                .client
                .search_tables()
                .set_catalog_id(self.catalog_id.clone())
                .search_text(text)
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| Self::service_error("search Glue tables", e))?;

            tables.extend(
                output
                    .table_list()
                    .iter()
                    .map(|t| Self::glue_table_to_definition(t, "")),
            );

            match output.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(tables)
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableDefinition>> {
        let result = self
            .client
            .get_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(database)
            .name(table)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .table()
                .map(|t| Self::glue_table_to_definition(t, database))),
            Err(e) if Self::is_not_found(&e) => Ok(None),
            Err(e) => Err(Self::service_error("load Glue table", e)),
        }
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<TableVersion> {
        let table_input = Self::build_table_input(table)?;

        let result = self
            .client
            .create_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(&table.database)
            .table_input(table_input)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(
                    database = %table.database,
                    table = %table.name,
                    location = %table.location,
                    "Created Glue table"
                );
                Ok(TableVersion(1))
            }
            Err(e) if Self::is_already_exists(&e) => {
                Err(CatalogError::AlreadyExists(table.qualified_name()).into())
            }
            Err(e) => Err(Self::service_error("create Glue table", e)),
        }
    }

    async fn update_table(&self, table: &TableDefinition, archive: bool) -> Result<TableVersion> {
        let table_input = Self::build_table_input(table)?;

        let result = self
            .client
            .update_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(&table.database)
            .table_input(table_input)
            .skip_archive(!archive)
            .send()
            .await;

        match result {
            Ok(_) => {}
            Err(e) if Self::is_not_found(&e) => {
                return Err(CatalogError::InvalidTable(table.qualified_name()).into())
            }
            Err(e) => return Err(Self::service_error("update Glue table", e)),
        }

        let version = self
            .get_table(&table.database, &table.name)
            .await?
            .map(|t| t.version)
            .unwrap_or_default();

        info!(
            database = %table.database,
            table = %table.name,
            version = %version,
            archive,
            "Updated Glue table"
        );
        Ok(version)
    }

    async fn delete_table(&self, database: &str, table: &str) -> Result<bool> {
        let result = self
            .client
            .delete_table()
            .set_catalog_id(self.catalog_id.clone())
            .database_name(database)
            .name(table)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(database = %database, table = %table, "Deleted Glue table");
                Ok(true)
            }
            Err(e) if Self::is_not_found(&e) => Ok(false),
            Err(e) => Err(Self::service_error("delete Glue table", e)),
        }
    }

    async fn upsert_partitions(
        &self,
        table: &TableDefinition,
        partitions: &PartitionMap,
    ) -> Result<()> {
        let entries: Vec<(String, Vec<String>)> = partitions
            .iter()
            .map(|(l, v)| (l.clone(), v.clone()))
            .collect();

        let mut existing = Vec::new();
        for chunk in entries.chunks(PARTITION_BATCH_SIZE) {
            let inputs = chunk
                .iter()
                .map(|(location, values)| {
                    Ok(PartitionInput::builder()
                        .set_values(Some(values.clone()))
                        .storage_descriptor(Self::build_storage_descriptor(
                            table, location, false,
                        )?)
                        .build())
                })
                .collect::<Result<Vec<_>>>()?;

            let output = self
                .client
                .batch_create_partition()
                .set_catalog_id(self.catalog_id.clone())
                .database_name(&table.database)
                .table_name(&table.name)
                .set_partition_input_list(Some(inputs))
                .send()
                .await
                .map_err(|e| Self::service_error("create Glue partitions", e))?;

            for failure in output.errors() {
                let code = failure.error_detail().and_then(|d| d.error_code());
                if code == Some("AlreadyExistsException") {
                    let values = failure.partition_values().to_vec();
                    if let Some(entry) = chunk.iter().find(|(_, v)| *v == values) {
                        existing.push(entry.clone());
                    }
                } else {
                    return Err(CatalogError::Service(format!(
                        "Failed to create partition {:?}: {:?}",
                        failure.partition_values(),
                        failure.error_detail().and_then(|d| d.error_message())
                    ))
                    .into());
                }
            }
        }

        if !existing.is_empty() {
            debug!(count = existing.len(), "Updating existing Glue partitions");
            self.update_partitions(table, existing).await?;
        }

        info!(
            database = %table.database,
            table = %table.name,
            partitions = entries.len(),
            "Upserted Glue partitions"
        );
        Ok(())
    }

    async fn get_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
    ) -> Result<PartitionMap> {
        let mut partitions = PartitionMap::new();
        let mut token: Option<String> = None;
        loop {
            let result = self
                .client
                .get_partitions()
                .set_catalog_id(self.catalog_id.clone())
                .database_name(database)
                .table_name(table)
                .set_expression(expression.map(str::to_string))
                .set_next_token(token.take())
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(e) if Self::is_not_found(&e) => {
                    return Err(CatalogError::InvalidTable(format!("{}.{}", database, table)).into())
                }
                Err(e) => return Err(Self::service_error("list Glue partitions", e)),
            };

            for partition in output.partitions() {
                if let Some(location) = partition.storage_descriptor().and_then(|sd| sd.location())
                {
                    partitions.insert(
                        ensure_trailing_slash(location),
                        partition.values().to_vec(),
                    );
                }
            }

            match output.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(partitions)
    }

    async fn delete_partitions(
        &self,
        database: &str,
        table: &str,
        values: &[Vec<String>],
    ) -> Result<()> {
        for chunk in values.chunks(PARTITION_DELETE_BATCH_SIZE) {
            let to_delete = chunk
                .iter()
                .map(|v| {
                    PartitionValueList::builder()
                        .set_values(Some(v.clone()))
                        .build()
                        .map_err(|e| Error::Config(format!("Failed to build partition key: {}", e)))
                })
                .collect::<Result<Vec<_>>>()?;

            self.client
                .batch_delete_partition()
                .set_catalog_id(self.catalog_id.clone())
                .database_name(database)
                .table_name(table)
                .set_partitions_to_delete(Some(to_delete))
                .send()
                .await
                .map_err(|e| Self::service_error("delete Glue partitions", e))?;
        }
        Ok(())
    }
}

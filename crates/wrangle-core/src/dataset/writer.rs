//! Dataset write orchestration.
//!
//! One call moves through `Validating -> Reconciling -> PhysicalWrite -> CatalogSync`:
//! - all argument and type checks run before any object or catalog mutation
//! - objects under a partition prefix are deleted before its replacement files
//!   are written; partitions are processed concurrently
//! - catalog metadata is updated only after the files are written
//!
//! A full `overwrite` deletes the old objects before writing the new ones, so a
//! failure in between leaves the table empty until the next successful write.

use crate::catalog::{
    serde_parameters, storage_parameters, PartitionMap, TableDefinition, TableVersion,
};
use crate::codec::{self, FileFormat};
use crate::dataset::partition::{derive_partitions, PartitionSlice};
use crate::dataset::reconcile::{reconcile, MetadataUpdate};
use crate::dataset::{WriteMode, WriteOptions, WriteResult};
use crate::error::ValidationError;
use crate::schema::{sanitize_table_name, ColumnType, SanitizedNames, TableSchema, TypeMapper};
use crate::session::Session;
use crate::{Error, Result};
use arrow::array::{new_null_array, ArrayRef, RecordBatch};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Batch and arguments after name sanitization.
struct PreparedWrite {
    batch: RecordBatch,
    partition_cols: Vec<String>,
    dtype: HashMap<String, String>,
    comments: HashMap<String, String>,
    table: Option<String>,
}

/// One file written by the physical phase.
struct WrittenFile {
    path: String,
    partition: Option<(String, Vec<String>)>,
}

/// Writes batches as files or catalog-managed datasets.
#[derive(Clone)]
pub struct DatasetWriter {
    session: Session,
}

impl DatasetWriter {
    /// Create a writer over a session.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Write `batch` according to `options`.
    pub async fn write(&self, batch: &RecordBatch, options: &WriteOptions) -> Result<WriteResult> {
        if batch.num_columns() == 0 || batch.num_rows() == 0 {
            return Err(ValidationError::EmptyDataFrame(format!(
                "Nothing to write to {}: {} rows, {} columns",
                options.path,
                batch.num_rows(),
                batch.num_columns()
            ))
            .into());
        }

        let prepared = Self::prepare(batch, options)?;

        if options.dataset {
            self.write_dataset(prepared, options).await
        } else {
            self.write_file(&prepared.batch, options).await
        }
    }

    fn prepare(batch: &RecordBatch, options: &WriteOptions) -> Result<PreparedWrite> {
        if !options.sanitize_columns {
            return Ok(PreparedWrite {
                batch: batch.clone(),
                partition_cols: options.partition_cols.clone(),
                dtype: options.dtype.clone(),
                comments: options.columns_comments.clone(),
                table: options.table.clone(),
            });
        }

        let schema = batch.schema();
        let names = SanitizedNames::build(schema.fields().iter().map(|f| f.name().as_str()))?;
        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_name(names.get(f.name())))
            .collect();
        let renamed = RecordBatch::try_new(Arc::new(Schema::new(fields)), batch.columns().to_vec())?;

        Ok(PreparedWrite {
            batch: renamed,
            partition_cols: options.partition_cols.iter().map(|c| names.get(c)).collect(),
            dtype: names.rename_keys(&options.dtype),
            comments: names.rename_keys(&options.columns_comments),
            table: options.table.as_deref().map(sanitize_table_name),
        })
    }

    async fn write_file(&self, batch: &RecordBatch, options: &WriteOptions) -> Result<WriteResult> {
        let mapper = TypeMapper::new(options.format);
        let schema = batch.schema();
        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if field.data_type() == &DataType::Null {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
                continue;
            }
            let mapped = mapper.map_type(field.name(), field.data_type())?;
            let target = mapped.to_arrow();
            if !mapped.is_composite() && field.data_type() != &target {
                columns.push(conform_column(field.name(), column, &target)?);
                fields.push(Field::new(field.name(), target, true));
            } else {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
            }
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        let data = codec::encode(&batch, &options.encode_options())?;
        self.session.storage().put(&options.path, data).await?;

        info!(
            path = %options.path,
            rows = batch.num_rows(),
            format = %options.format,
            "Wrote file"
        );

        Ok(WriteResult {
            paths: vec![options.path.clone()],
            partitions_values: PartitionMap::new(),
        })
    }

    async fn write_dataset(
        &self,
        prepared: PreparedWrite,
        options: &WriteOptions,
    ) -> Result<WriteResult> {
        // Validating
        let mapper = TypeMapper::new(options.format);
        let incoming = mapper.map_schema(
            &prepared.batch.schema(),
            &prepared.partition_cols,
            &prepared.dtype,
        )?;

        let mode = if options.mode == WriteMode::OverwritePartitions
            && prepared.partition_cols.is_empty()
        {
            WriteMode::Overwrite
        } else {
            options.mode
        };

        let target = match (&options.database, &prepared.table) {
            (Some(db), Some(table)) => Some((db.clone(), table.clone())),
            _ => None,
        };
        let existing = match &target {
            Some((db, table)) => self.session.catalog().get_table(db, table).await?,
            None => None,
        };

        if let Some(table) = &existing {
            if mode != WriteMode::Overwrite && table.format != options.format {
                return Err(Error::invalid_combination(format!(
                    "Table {} is stored as {}, cannot {} {} files",
                    table.qualified_name(),
                    table.format,
                    mode,
                    options.format
                )));
            }
        }

        // Reconciling
        let mut parameters =
            storage_parameters(options.format, options.compression, options.csv.delimiter);
        parameters.extend(options.parameters.clone());
        let update = MetadataUpdate {
            parameters,
            comments: prepared.comments.clone(),
            description: options.description.clone(),
        };
        let state = reconcile(existing.as_ref(), &incoming, mode, &update)?;

        let location = match &existing {
            Some(table) if mode != WriteMode::Overwrite => {
                Self::merge_location(table, &options.path)?
            }
            Some(table)
                if options.catalog_versioning
                    && !state.is_compatible
                    && table.schema.partitions.is_empty()
                    && state.schema.partitions.is_empty() =>
            {
                format!(
                    "{}_v{}/",
                    options.path.trim_end_matches('/'),
                    table.version.next()
                )
            }
            _ => options.path.clone(),
        };
        let fresh_location = mode == WriteMode::Overwrite && location != options.path;

        let aligned = Self::align_batch(
            &prepared.batch,
            &state.schema,
            &mapper,
            options.format,
        )?;
        let slices = derive_partitions(&aligned, &prepared.partition_cols)?;

        // PhysicalWrite
        if mode == WriteMode::Overwrite && !fresh_location {
            self.delete_previous_objects(&location, existing.as_ref())
                .await?;
        }
        let written = self
            .write_slices(
                &location,
                slices,
                options,
                mode == WriteMode::OverwritePartitions,
            )
            .await?;

        let mut paths: Vec<String> = written.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        let partitions_values: PartitionMap =
            written.into_iter().filter_map(|f| f.partition).collect();

        // CatalogSync
        if let Some((database, table)) = &target {
            let mut definition =
                TableDefinition::new(database, table, &location, options.format)
                    .with_schema(state.schema.clone())
                    .with_parameters(state.parameters.clone())
                    .with_description(state.description.clone());
            definition.comments = state.comments.clone();
            definition.serde_parameters = serde_parameters(options.format, options.csv.delimiter);

            let version = self
                .sync_catalog(&definition, existing.as_ref(), mode, options, &partitions_values)
                .await?;

            if let (true, Some(previous)) = (fresh_location, &existing) {
                self.session
                    .storage()
                    .delete_prefix(&previous.location)
                    .await?;
                info!(
                    table = %definition.qualified_name(),
                    previous_location = %previous.location,
                    location = %location,
                    version = %version,
                    "Moved table to a new versioned location"
                );
            }
        }

        info!(
            path = %location,
            mode = %mode,
            files = paths.len(),
            partitions = partitions_values.len(),
            "Dataset write complete"
        );

        Ok(WriteResult {
            paths,
            partitions_values,
        })
    }

    async fn sync_catalog(
        &self,
        definition: &TableDefinition,
        existing: Option<&TableDefinition>,
        mode: WriteMode,
        options: &WriteOptions,
        partitions: &PartitionMap,
    ) -> Result<TableVersion> {
        let sync = self.session.synchronizer();
        let version = sync
            .apply_definition(
                definition,
                existing,
                mode == WriteMode::Overwrite,
                options.catalog_versioning,
            )
            .await?;
        sync.add_partitions(definition, partitions).await?;
        Ok(version)
    }

    /// Location to write into when extending an existing table.
    ///
    /// A table moved to a versioned sibling location (`<path>_vN/`) is still
    /// addressed by its original path.
    fn merge_location(table: &TableDefinition, requested: &str) -> Result<String> {
        if table.location == requested {
            return Ok(table.location.clone());
        }
        let versioned = format!("{}_v", requested.trim_end_matches('/'));
        if table.location.starts_with(&versioned) {
            return Ok(table.location.clone());
        }
        Err(Error::invalid_value(format!(
            "Table {} is stored at {}, not {}",
            table.qualified_name(),
            table.location,
            requested
        )))
    }

    /// Delete everything a full overwrite replaces.
    async fn delete_previous_objects(
        &self,
        location: &str,
        existing: Option<&TableDefinition>,
    ) -> Result<()> {
        let storage = self.session.storage();
        let mut prefixes = vec![location.to_string()];

        if let Some(table) = existing {
            if !prefixes.contains(&table.location) {
                prefixes.push(table.location.clone());
            }
            if !table.schema.partitions.is_empty() {
                let partitions = self
                    .session
                    .catalog()
                    .get_partitions(&table.database, &table.name, None)
                    .await?;
                for partition in partitions.into_keys() {
                    if !prefixes.iter().any(|p| partition.starts_with(p.as_str())) {
                        prefixes.push(partition);
                    }
                }
            }
        }

        for prefix in &prefixes {
            storage.delete_prefix(prefix).await?;
        }
        Ok(())
    }

    async fn write_slices(
        &self,
        location: &str,
        slices: Vec<PartitionSlice>,
        options: &WriteOptions,
        replace_partitions: bool,
    ) -> Result<Vec<WrittenFile>> {
        let storage = self.session.storage();
        let concurrency = options.concurrency.unwrap_or_else(|| storage.concurrency());
        let encode_options = options.encode_options();
        let extension = options.compression.file_extension(options.format);

        stream::iter(slices)
            .map(|slice| {
                let encode_options = encode_options.clone();
                async move {
                    let prefix = format!("{}{}", location, slice.location);
                    if replace_partitions {
                        storage.delete_prefix(&prefix).await?;
                    }

                    let path = format!("{}{}{}", prefix, uuid::Uuid::new_v4().simple(), extension);
                    let data = codec::encode(&slice.batch, &encode_options)?;
                    storage.put(&path, data).await?;
                    debug!(path = %path, rows = slice.batch.num_rows(), "Wrote dataset file");

                    let partition = (!slice.values.is_empty()).then(|| (prefix, slice.values));
                    Ok::<_, Error>(WrittenFile { path, partition })
                }
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await
    }

    /// Cast columns to their reconciled types.
    ///
    /// CSV files are read positionally, so CSV batches are also reordered to the
    /// table's column order with absent columns filled with nulls.
    fn align_batch(
        batch: &RecordBatch,
        schema: &TableSchema,
        mapper: &TypeMapper,
        format: FileFormat,
    ) -> Result<RecordBatch> {
        let batch_schema = batch.schema();
        let partition_names = schema.partition_names();

        let order: Vec<String> = match format {
            FileFormat::Csv => schema
                .columns
                .iter()
                .map(|c| c.name.clone())
                .chain(partition_names.iter().cloned())
                .collect(),
            FileFormat::Parquet => batch_schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect(),
        };

        let mut fields = Vec::with_capacity(order.len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(order.len());
        for name in order {
            let declared = schema.lookup(&name);
            match batch_schema.index_of(&name) {
                Ok(index) => {
                    let field = batch_schema.field(index);
                    let column = batch.column(index);
                    let needs_cast = |declared: &ColumnType| {
                        if declared.is_composite() {
                            mapper.map_type(&name, field.data_type()).ok().as_ref() != Some(declared)
                        } else {
                            field.data_type() != &declared.to_arrow()
                        }
                    };
                    match declared {
                        Some(declared)
                            if !partition_names.contains(&name) && needs_cast(declared) =>
                        {
                            let target = declared.to_arrow();
                            debug!(column = %name, to = %declared, "Casting column to table type");
                            columns.push(conform_column(&name, column, &target)?);
                            fields.push(Field::new(&name, target, true));
                        }
                        _ => {
                            columns.push(column.clone());
                            fields.push(field.clone());
                        }
                    }
                }
                Err(_) => {
                    let Some(declared) = declared else { continue };
                    let target = declared.to_arrow();
                    columns.push(new_null_array(&target, batch.num_rows()));
                    fields.push(Field::new(&name, target, true));
                }
            }
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

/// Cast a column to its catalog type, failing on any value that does not convert.
fn conform_column(name: &str, column: &ArrayRef, target: &DataType) -> Result<ArrayRef> {
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(column, target, &options).map_err(|e| {
        Error::invalid_value(format!(
            "Column '{}' of type {} cannot be stored as {}: {}",
            name,
            column.data_type(),
            target,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::schema::ColumnType;
    use arrow::array::{Array, Int64Array, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array};

    fn session() -> Session {
        Session::in_memory()
    }

    fn batch(ids: Vec<i64>, names: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("Id", DataType::Int64, false),
            Field::new("Name", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let writer = DatasetWriter::new(session());
        let empty = batch(vec![], vec![]);
        let options = WriteOptions::builder("s3://bucket/f.parquet").build().unwrap();
        let err = writer.write(&empty, &options).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EmptyDataFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_single_file_write() {
        let session = session();
        let writer = DatasetWriter::new(session.clone());
        let options = WriteOptions::builder("s3://bucket/dir/f.parquet").build().unwrap();
        let result = writer
            .write(&batch(vec![1, 2], vec!["a", "b"]), &options)
            .await
            .unwrap();

        assert_eq!(result.paths, vec!["s3://bucket/dir/f.parquet"]);
        let data = session.storage().read("s3://bucket/dir/f.parquet").await.unwrap();
        let (schema, batches) = codec::decode_parquet(data).unwrap();
        assert_eq!(schema.field(0).name(), "Id");
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn test_single_file_promotes_unsigned_columns() {
        let session = session();
        let writer = DatasetWriter::new(session.clone());
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::UInt8, false),
            Field::new("b", DataType::UInt16, false),
            Field::new("c", DataType::UInt32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt8Array::from(vec![200])),
                Arc::new(UInt16Array::from(vec![60_000])),
                Arc::new(UInt32Array::from(vec![4_000_000_000])),
            ],
        )
        .unwrap();
        let options = WriteOptions::builder("s3://bucket/u.parquet").build().unwrap();
        writer.write(&batch, &options).await.unwrap();

        let data = session.storage().read("s3://bucket/u.parquet").await.unwrap();
        let (schema, batches) = codec::decode_parquet(data).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Int16);
        assert_eq!(schema.field(1).data_type(), &DataType::Int32);
        assert_eq!(schema.field(2).data_type(), &DataType::Int64);
        let c = batches[0]
            .column(2)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(c.value(0), 4_000_000_000);
    }

    #[tokio::test]
    async fn test_u64_is_unsupported_before_any_write() {
        let session = session();
        let writer = DatasetWriter::new(session.clone());
        let schema = Arc::new(Schema::new(vec![Field::new("c", DataType::UInt64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(UInt64Array::from(vec![u64::MAX]))])
                .unwrap();
        let options = WriteOptions::builder("s3://bucket/ds/")
            .dataset(true)
            .build()
            .unwrap();

        let err = writer.write(&batch, &options).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnsupportedType(_))
        ));
        assert!(session.storage().list("s3://bucket/ds/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_write_sanitizes_names() {
        let session = session();
        session
            .catalog()
            .create_database("db", None, false)
            .await
            .unwrap();
        let writer = DatasetWriter::new(session.clone());
        let options = WriteOptions::builder("s3://bucket/tbl/")
            .dataset(true)
            .database("db")
            .table("MyTable")
            .mode(WriteMode::Overwrite)
            .partition_cols(["Name"])
            .build()
            .unwrap();

        let result = writer
            .write(&batch(vec![1, 2, 3], vec!["a", "b", "a"]), &options)
            .await
            .unwrap();
        assert_eq!(result.paths.len(), 2);
        assert!(result.partitions_values.contains_key("s3://bucket/tbl/name=a/"));

        let table = session
            .catalog()
            .get_table("db", "my_table")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(table.schema.column_type("id"), Some(&ColumnType::BigInt));
        assert_eq!(table.schema.partition_names(), vec!["name"]);
        assert_eq!(table.parameters["classification"], "parquet");
    }

    #[tokio::test]
    async fn test_append_to_other_location_is_rejected() {
        let session = session();
        session
            .catalog()
            .create_database("db", None, false)
            .await
            .unwrap();
        let writer = DatasetWriter::new(session.clone());
        let first = WriteOptions::builder("s3://bucket/a/")
            .dataset(true)
            .database("db")
            .table("t")
            .build()
            .unwrap();
        writer.write(&batch(vec![1], vec!["x"]), &first).await.unwrap();

        let second = WriteOptions::builder("s3://bucket/b/")
            .dataset(true)
            .database("db")
            .table("t")
            .build()
            .unwrap();
        let err = writer
            .write(&batch(vec![2], vec!["y"]), &second)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(session.storage().list("s3://bucket/b/").await.unwrap().is_empty());
    }
}

//! Integration tests for wrangle-core.
//!
//! Writes run against the in-memory catalog and object store. Queries run
//! against a scripted query service that executes every statement instantly
//! over a fixed source table, writing CTAS output to the shared store the way
//! the real service does.

use arrow::array::{
    Array, ArrayRef, Int64Array, RecordBatch, StringArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::compute::{cast, sum};
use arrow::datatypes::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wrangle_core::athena::ctas::{manifest_location, parse_ctas_select};
use wrangle_core::athena::{
    QueryExecution, QueryOptions, QueryOutput, QueryRequest, QueryService, QueryState,
    ResultColumn, ResultPage, StatementType, WorkgroupConfig,
};
use wrangle_core::catalog::{Catalog, MemoryCatalog, TableDefinition};
use wrangle_core::codec::{self, Compression, FileFormat};
use wrangle_core::dataset::{WriteMode, WriteOptions};
use wrangle_core::error::{QueryError, ValidationError};
use wrangle_core::schema::{ColumnType, SchemaColumn, TableSchema};
use wrangle_core::storage::ObjectStorage;
use wrangle_core::{Config, Error, Result, Session};

/// Rows per result page served by the scripted service.
const PAGE_SIZE: usize = 3;

fn source_batch(rows: usize) -> RecordBatch {
    let ids: Int64Array = (0..rows as i64).collect::<Vec<_>>().into();
    let names: StringArray = (0..rows).map(|i| Some(format!("n{}", i))).collect();
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ])),
        vec![Arc::new(ids), Arc::new(names)],
    )
    .unwrap()
}

/// Query service that runs every statement over `source_batch(rows)`.
struct ScriptedAthena {
    storage: Arc<ObjectStorage>,
    catalog: Arc<dyn Catalog>,
    rows: usize,
    executions: Mutex<Vec<QueryExecution>>,
    /// Failure applied to the next started query
    failure: Mutex<Option<(QueryState, String)>>,
    /// Leave new queries RUNNING instead of finishing them
    hold: Mutex<bool>,
    workgroup: WorkgroupConfig,
    started: AtomicUsize,
    result_fetches: AtomicUsize,
}

impl ScriptedAthena {
    fn new(storage: Arc<ObjectStorage>, catalog: Arc<dyn Catalog>, rows: usize) -> Self {
        Self {
            storage,
            catalog,
            rows,
            executions: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            hold: Mutex::new(false),
            workgroup: WorkgroupConfig::default(),
            started: AtomicUsize::new(0),
            result_fetches: AtomicUsize::new(0),
        }
    }

    fn with_workgroup(mut self, workgroup: WorkgroupConfig) -> Self {
        self.workgroup = workgroup;
        self
    }

    fn fail_next(&self, state: QueryState, reason: &str) {
        *self.failure.lock() = Some((state, reason.to_string()));
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn last_query(&self) -> String {
        self.executions
            .lock()
            .last()
            .map(|e| e.query.clone())
            .unwrap_or_default()
    }

    async fn materialize_ctas(&self, request: &QueryRequest, output: &str) -> Result<()> {
        let table = request.sql.split('"').nth(3).unwrap_or_default().to_string();
        let database = request.database.clone().unwrap_or_default();
        let data_location = format!(
            "{}{}/",
            request.output_location.clone().unwrap_or_default(),
            table
        );

        let mut files = Vec::new();
        if self.rows > 0 {
            let path = format!("{}part-00000.parquet", data_location);
            let compression = Compression::resolve(None, FileFormat::Parquet)?;
            let data = codec::encode_parquet(&source_batch(self.rows), compression)?;
            self.storage.put(&path, data).await?;
            files.push(path);
        }
        let manifest = files.iter().map(|f| format!("{}\n", f)).collect::<String>();
        self.storage
            .put(&manifest_location(output), manifest.into())
            .await?;
        self.storage
            .put(&format!("{}.metadata", output), "{}".into())
            .await?;

        let definition = TableDefinition::new(&database, &table, &data_location, FileFormat::Parquet)
            .with_schema(TableSchema::new(
                vec![
                    SchemaColumn::new("id", ColumnType::BigInt),
                    SchemaColumn::new("name", ColumnType::String),
                ],
                vec![],
            ));
        self.catalog.create_table(&definition).await?;
        Ok(())
    }
}

#[async_trait]
impl QueryService for ScriptedAthena {
    async fn start_query_execution(&self, request: &QueryRequest) -> Result<String> {
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        let id = format!("query-{}", n);
        let base = request.output_location.clone().unwrap_or_default();
        let is_ctas = parse_ctas_select(&request.sql).is_some();
        let output = if is_ctas {
            format!("{}tables/{}", base, id)
        } else {
            format!("{}{}.csv", base, id)
        };

        let failure = self.failure.lock().take();
        let hold = *self.hold.lock();
        let (state, reason) = match failure {
            Some((state, reason)) => (state, Some(reason)),
            None if hold => (QueryState::Running, None),
            None => {
                if is_ctas {
                    self.materialize_ctas(request, &output).await?;
                }
                (QueryState::Succeeded, None)
            }
        };

        let now = Utc::now();
        self.executions.lock().push(QueryExecution {
            id: id.clone(),
            query: request.sql.clone(),
            statement_type: if is_ctas {
                StatementType::Ddl
            } else {
                StatementType::Dml
            },
            database: request.database.clone(),
            workgroup: request.workgroup.clone(),
            output_location: Some(output),
            state,
            state_change_reason: reason,
            submitted_at: Some(now),
            completed_at: state.is_terminal().then_some(now),
        });
        Ok(id)
    }

    async fn get_query_execution(&self, id: &str) -> Result<QueryExecution> {
        self.executions
            .lock()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| QueryError::Service(format!("unknown execution {}", id)).into())
    }

    async fn get_query_results(&self, _id: &str, next_token: Option<String>) -> Result<ResultPage> {
        self.result_fetches.fetch_add(1, Ordering::SeqCst);
        let start: usize = next_token.as_deref().unwrap_or("0").parse().unwrap_or(0);
        let end = (start + PAGE_SIZE).min(self.rows);
        let rows = (start..end)
            .map(|i| vec![Some(i.to_string()), Some(format!("n{}", i))])
            .collect();
        let column = |name: &str, type_name: &str| ResultColumn {
            name: name.into(),
            type_name: type_name.into(),
            precision: 0,
            scale: 0,
        };
        Ok(ResultPage {
            columns: vec![column("id", "bigint"), column("name", "varchar")],
            rows,
            next_token: (end < self.rows).then(|| end.to_string()),
        })
    }

    async fn stop_query_execution(&self, id: &str) -> Result<()> {
        if let Some(e) = self.executions.lock().iter_mut().find(|e| e.id == id) {
            e.state = QueryState::Cancelled;
            e.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_query_executions(
        &self,
        _workgroup: &str,
        _next_token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let ids = self
            .executions
            .lock()
            .iter()
            .rev()
            .map(|e| e.id.clone())
            .collect();
        Ok((ids, None))
    }

    async fn batch_get_query_execution(&self, ids: &[String]) -> Result<Vec<QueryExecution>> {
        Ok(self
            .executions
            .lock()
            .iter()
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect())
    }

    async fn workgroup_config(&self, _workgroup: &str) -> Result<WorkgroupConfig> {
        Ok(self.workgroup.clone())
    }
}

struct Harness {
    session: Session,
    catalog: Arc<MemoryCatalog>,
    storage: Arc<ObjectStorage>,
    athena: Arc<ScriptedAthena>,
}

async fn harness(rows: usize) -> Harness {
    harness_with(rows, WorkgroupConfig::default()).await
}

async fn harness_with(rows: usize, workgroup: WorkgroupConfig) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.create_database("db", None, false).await.unwrap();
    let storage = Arc::new(ObjectStorage::in_memory());
    let athena = Arc::new(
        ScriptedAthena::new(storage.clone(), catalog.clone(), rows).with_workgroup(workgroup),
    );

    let mut config = Config::default();
    config.athena.s3_output = Some("s3://results/".into());
    config.athena.poll_interval_ms = 1;
    config.athena.max_poll_interval_ms = 5;

    let queries: Arc<dyn QueryService> = athena.clone();
    let session = Session::new(catalog.clone(), Some(queries), storage.clone(), config);
    Harness {
        session,
        catalog,
        storage,
        athena,
    }
}

fn int_batch(columns: Vec<(&str, Vec<Option<i64>>)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(*name, DataType::Int64, true))
        .collect();
    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|(_, values)| Arc::new(Int64Array::from(values)) as ArrayRef)
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

fn table_options(path: &str, mode: WriteMode) -> WriteOptions {
    WriteOptions::builder(path)
        .dataset(true)
        .mode(mode)
        .database("db")
        .table("t")
        .build()
        .unwrap()
}

/// Row count and sum of `column` over every parquet file under `prefix`.
async fn scan(storage: &ObjectStorage, prefix: &str, column: &str) -> (usize, i64) {
    let mut rows = 0;
    let mut total = 0;
    for file in storage.list(prefix).await.unwrap() {
        let (_, batches) = codec::decode_parquet(storage.read(&file).await.unwrap()).unwrap();
        for batch in batches {
            rows += batch.num_rows();
            if let Some(array) = batch.column_by_name(column) {
                let values = cast(array, &DataType::Int64).unwrap();
                let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
                total += sum(values).unwrap_or(0);
            }
        }
    }
    (rows, total)
}

async fn column_names(catalog: &MemoryCatalog, table: &str) -> Vec<String> {
    let definition = catalog.get_table("db", table).await.unwrap().unwrap();
    definition
        .schema
        .columns
        .iter()
        .chain(definition.schema.partitions.iter())
        .map(|c| c.name.clone())
        .collect()
}

mod write_integration {
    use super::*;

    /// Overwrite and append rounds over a nullable integer column.
    #[tokio::test]
    async fn test_mutating_rounds() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let path = "s3://bucket/rounds/";

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(0), None])]),
                &table_options(path, WriteMode::Overwrite),
            )
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (2, 0));

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(1), Some(2)])]),
                &table_options(path, WriteMode::Append),
            )
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (4, 3));

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(3)]), ("c1", vec![Some(100)])]),
                &table_options(path, WriteMode::Append),
            )
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (5, 6));
        assert_eq!(column_names(&h.catalog, "t").await, vec!["c0", "c1"]);

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(5), Some(6)]), ("c2", vec![None, Some(1)])]),
                &table_options(path, WriteMode::Overwrite),
            )
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (2, 11));
        assert_eq!(column_names(&h.catalog, "t").await, vec!["c0", "c2"]);

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(7)])]),
                &table_options(path, WriteMode::Append),
            )
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (3, 18));
        assert_eq!(column_names(&h.catalog, "t").await, vec!["c0", "c2"]);
    }

    /// warm-up, overwrite, append, append with a new column, partitioned
    /// overwrite, then overwrite_partitions.
    #[tokio::test]
    async fn test_mode_sequence() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let path = "s3://bucket/sequence/";
        let base = || {
            int_batch(vec![
                ("v", vec![Some(1), Some(2), Some(3)]),
                ("p", vec![Some(0), Some(0), Some(1)]),
            ])
        };

        writer.write(&base(), &table_options(path, WriteMode::Overwrite)).await.unwrap();
        writer.write(&base(), &table_options(path, WriteMode::Overwrite)).await.unwrap();
        assert_eq!(scan(&h.storage, path, "v").await, (3, 6));

        writer.write(&base(), &table_options(path, WriteMode::Append)).await.unwrap();
        assert_eq!(scan(&h.storage, path, "v").await, (6, 12));

        let wider = int_batch(vec![
            ("v", vec![Some(10)]),
            ("p", vec![Some(1)]),
            ("extra", vec![Some(7)]),
        ]);
        writer.write(&wider, &table_options(path, WriteMode::Append)).await.unwrap();
        assert_eq!(scan(&h.storage, path, "v").await, (7, 22));
        assert_eq!(column_names(&h.catalog, "t").await, vec!["v", "p", "extra"]);

        let partitioned = |mode| {
            WriteOptions::builder(path)
                .dataset(true)
                .mode(mode)
                .partition_cols(["p"])
                .database("db")
                .table("t")
                .build()
                .unwrap()
        };
        let result = writer
            .write(&base(), &partitioned(WriteMode::Overwrite))
            .await
            .unwrap();
        assert_eq!(result.partitions_values.len(), 2);
        assert_eq!(scan(&h.storage, path, "v").await, (3, 6));
        assert_eq!(column_names(&h.catalog, "t").await, vec!["v", "p"]);

        // Only p=1 is replaced, p=0 keeps its two rows.
        let replacement = int_batch(vec![
            ("v", vec![Some(30), Some(40)]),
            ("p", vec![Some(1), Some(1)]),
        ]);
        writer
            .write(&replacement, &partitioned(WriteMode::OverwritePartitions))
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, &format!("{}p=0/", path), "v").await, (2, 3));
        assert_eq!(scan(&h.storage, &format!("{}p=1/", path), "v").await, (2, 70));

        let partitions = h.catalog.get_partitions("db", "t", None).await.unwrap();
        assert_eq!(partitions.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_append_registers_partition_once() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let options = WriteOptions::builder("s3://bucket/idem/")
            .dataset(true)
            .partition_cols(["p"])
            .database("db")
            .table("idem")
            .build()
            .unwrap();
        let batch = int_batch(vec![("v", vec![Some(1)]), ("p", vec![Some(5)])]);

        writer.write(&batch, &options).await.unwrap();
        writer.write(&batch, &options).await.unwrap();

        let partitions = h.catalog.get_partitions("db", "idem", None).await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(
            partitions.get("s3://bucket/idem/p=5/"),
            Some(&vec!["5".to_string()])
        );
        assert_eq!(scan(&h.storage, "s3://bucket/idem/", "v").await, (2, 2));
    }

    #[tokio::test]
    async fn test_unsigned_64_bit_is_rejected_before_writing() {
        let h = harness(0).await;
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("u", DataType::UInt64, true)])),
            vec![Arc::new(UInt64Array::from(vec![u64::MAX]))],
        )
        .unwrap();

        let err = h
            .session
            .writer()
            .write(&batch, &table_options("s3://bucket/u64/", WriteMode::Overwrite))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnsupportedType(_))
        ));
        assert!(h.storage.list("s3://bucket/u64/").await.unwrap().is_empty());
        assert!(h.catalog.get_table("db", "t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_csv_partitioned_table() {
        let h = harness(0).await;
        let path = "s3://bucket/csv/";
        let options = WriteOptions::builder(path)
            .dataset(true)
            .format(FileFormat::Csv)
            .mode(WriteMode::Overwrite)
            .partition_cols(["p"])
            .database("db")
            .table("csv_t")
            .build()
            .unwrap();
        let batch = int_batch(vec![
            ("v", vec![Some(1), Some(2), Some(3)]),
            ("p", vec![Some(0), Some(0), Some(1)]),
        ]);
        let result = h.session.writer().write(&batch, &options).await.unwrap();
        assert_eq!(result.paths.len(), 2);
        assert!(result.paths.iter().all(|p| p.ends_with(".csv")));

        // No header row: the first line is data and infers as an integer column.
        let mut rows = 0;
        let mut total = 0;
        for file in &result.paths {
            let data = h.storage.read(file).await.unwrap();
            let csv = codec::CsvOptions {
                delimiter: b',',
                header: false,
            };
            let (schema, batches) = codec::decode_csv(data, &csv).unwrap();
            assert_eq!(schema.fields().len(), 1);
            assert_eq!(schema.field(0).data_type(), &DataType::Int64);
            for batch in batches {
                rows += batch.num_rows();
                let values = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
                total += sum(values).unwrap_or(0);
            }
        }
        assert_eq!((rows, total), (3, 6));

        let table = h.catalog.get_table("db", "csv_t").await.unwrap().unwrap();
        assert_eq!(table.format, FileFormat::Csv);
        assert_eq!(table.parameters["classification"], "csv");
        assert_eq!(table.parameters["delimiter"], ",");
        assert_eq!(table.serde_parameters["field.delim"], ",");
        assert_eq!(table.schema.partition_names(), vec!["p"]);

        let partitions = h.catalog.get_partitions("db", "csv_t", None).await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(
            partitions.get("s3://bucket/csv/p=1/"),
            Some(&vec!["1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_overwrite_partitions_without_partition_cols_overwrites() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let path = "s3://bucket/flat/";

        writer
            .write(
                &int_batch(vec![("v", vec![Some(1), Some(2)])]),
                &table_options(path, WriteMode::Overwrite),
            )
            .await
            .unwrap();
        writer
            .write(
                &int_batch(vec![("v", vec![Some(5)])]),
                &table_options(path, WriteMode::OverwritePartitions),
            )
            .await
            .unwrap();

        assert_eq!(scan(&h.storage, path, "v").await, (1, 5));
        assert_eq!(h.storage.list(path).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_with_unconvertible_values_fails_before_writing() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let path = "s3://bucket/strict/";
        let strings = |values: Vec<&str>| {
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![Field::new("c0", DataType::Utf8, true)])),
                vec![Arc::new(StringArray::from(values)) as ArrayRef],
            )
            .unwrap()
        };

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(1)])]),
                &table_options(path, WriteMode::Overwrite),
            )
            .await
            .unwrap();

        let err = writer
            .write(&strings(vec!["abc", "7"]), &table_options(path, WriteMode::Append))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidArgumentValue(_))
        ));
        assert_eq!(h.storage.list(path).await.unwrap().len(), 1);

        // Values that convert are stored with the table's type.
        writer
            .write(&strings(vec!["7", "8"]), &table_options(path, WriteMode::Append))
            .await
            .unwrap();
        assert_eq!(scan(&h.storage, path, "c0").await, (3, 16));
        let table = h.catalog.get_table("db", "t").await.unwrap().unwrap();
        assert_eq!(table.schema.column_type("c0"), Some(&ColumnType::BigInt));
    }

    #[tokio::test]
    async fn test_unsigned_columns_are_stored_as_catalog_types() {
        let h = harness(0).await;
        let path = "s3://bucket/unsigned/";
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::UInt8, true),
                Field::new("b", DataType::UInt16, true),
                Field::new("c", DataType::UInt32, true),
            ])),
            vec![
                Arc::new(UInt8Array::from(vec![200])) as ArrayRef,
                Arc::new(UInt16Array::from(vec![60_000])),
                Arc::new(UInt32Array::from(vec![4_000_000_000])),
            ],
        )
        .unwrap();

        let result = h
            .session
            .writer()
            .write(&batch, &table_options(path, WriteMode::Overwrite))
            .await
            .unwrap();

        let table = h.catalog.get_table("db", "t").await.unwrap().unwrap();
        assert_eq!(table.schema.column_type("a"), Some(&ColumnType::SmallInt));
        assert_eq!(table.schema.column_type("b"), Some(&ColumnType::Int));
        assert_eq!(table.schema.column_type("c"), Some(&ColumnType::BigInt));

        let data = h.storage.read(&result.paths[0]).await.unwrap();
        let (schema, _) = codec::decode_parquet(data).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Int16);
        assert_eq!(schema.field(1).data_type(), &DataType::Int32);
        assert_eq!(schema.field(2).data_type(), &DataType::Int64);
        assert_eq!(scan(&h.storage, path, "c").await, (1, 4_000_000_000));
    }

    #[tokio::test]
    async fn test_versioned_overwrite_moves_location() {
        let h = harness(0).await;
        let writer = h.session.writer();
        let path = "s3://bucket/versioned/";

        writer
            .write(
                &int_batch(vec![("c0", vec![Some(1)])]),
                &table_options(path, WriteMode::Overwrite),
            )
            .await
            .unwrap();

        let strings = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("c0", DataType::Utf8, true)])),
            vec![Arc::new(StringArray::from(vec!["a", "b"]))],
        )
        .unwrap();
        let options = WriteOptions::builder(path)
            .dataset(true)
            .mode(WriteMode::Overwrite)
            .database("db")
            .table("t")
            .catalog_versioning(true)
            .build()
            .unwrap();
        let result = writer.write(&strings, &options).await.unwrap();
        assert!(result.paths.iter().all(|p| p.starts_with("s3://bucket/versioned_v2/")));

        let table = h.catalog.get_table("db", "t").await.unwrap().unwrap();
        assert_eq!(table.location, "s3://bucket/versioned_v2/");
        assert_eq!(table.schema.column_type("c0"), Some(&ColumnType::String));
        assert_eq!(h.catalog.archived_versions("db", "t"), 1);
        assert!(h.storage.list(path).await.unwrap().is_empty());

        // Appends addressed to the original path land in the versioned location.
        let appended = writer
            .write(&strings, &table_options(path, WriteMode::Append))
            .await
            .unwrap();
        assert!(appended.paths[0].starts_with("s3://bucket/versioned_v2/"));
        assert_eq!(
            h.storage.list("s3://bucket/versioned_v2/").await.unwrap().len(),
            2
        );
    }
}

mod query_integration {
    use super::*;

    fn direct() -> QueryOptions {
        QueryOptions::new().with_database("db").with_ctas_approach(false)
    }

    fn ctas() -> QueryOptions {
        QueryOptions::new().with_database("db").with_ctas_approach(true)
    }

    async fn chunk_sizes(output: QueryOutput) -> Vec<usize> {
        let QueryOutput::Chunks(mut chunks) = output else {
            panic!("expected chunked output");
        };
        let mut sizes = Vec::new();
        while chunks.has_next().await.unwrap() {
            sizes.push(chunks.next_chunk().await.unwrap().unwrap().num_rows());
        }
        sizes
    }

    #[tokio::test]
    async fn test_cache_disabled_always_executes() {
        let h = harness(5).await;
        let executor = h.session.executor();
        let options = direct().with_max_cache_seconds(0);

        executor.read_sql_query("SELECT * FROM t", &options).await.unwrap();
        executor.read_sql_query("SELECT * FROM t", &options).await.unwrap();
        assert_eq!(h.athena.started(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_execution() {
        let h = harness(5).await;
        let executor = h.session.executor();

        let first = executor
            .read_sql_query("SELECT * FROM t", &direct())
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(h.athena.started(), 1);

        // Trailing semicolon is the same query.
        let cached = executor
            .read_sql_query("SELECT * FROM t;", &direct().with_max_cache_seconds(900))
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(h.athena.started(), 1);
        assert_eq!(cached.num_rows(), first.num_rows());

        // Any other text difference is a different query.
        executor
            .read_sql_query("select * from t", &direct().with_max_cache_seconds(900))
            .await
            .unwrap();
        assert_eq!(h.athena.started(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_on_ctas_execution() {
        let h = harness(4).await;
        let executor = h.session.executor();

        executor.read_sql_query("SELECT id FROM t", &ctas()).await.unwrap();
        assert_eq!(h.athena.started(), 1);

        let table = executor
            .read_sql_query("SELECT id FROM t", &ctas().with_max_cache_seconds(900))
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(h.athena.started(), 1);
        assert_eq!(table.num_rows(), 4);
    }

    #[tokio::test]
    async fn test_chunks_of_two() {
        for options in [direct(), ctas()] {
            let h = harness(5).await;
            let output = h
                .session
                .executor()
                .read_sql_query("SELECT * FROM t", &options.with_chunksize(2))
                .await
                .unwrap();
            assert_eq!(chunk_sizes(output).await, vec![2, 2, 1]);
        }
    }

    #[tokio::test]
    async fn test_chunks_as_stream() {
        use futures::TryStreamExt;

        let h = harness(5).await;
        let output = h
            .session
            .executor()
            .read_sql_query("SELECT * FROM t", &ctas().with_chunksize(3))
            .await
            .unwrap();
        let QueryOutput::Chunks(chunks) = output else {
            panic!("expected chunked output");
        };
        let batches: Vec<RecordBatch> = chunks.into_stream().try_collect().await.unwrap();
        let sizes: Vec<usize> = batches.iter().map(RecordBatch::num_rows).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_empty_result_yields_no_chunks() {
        for options in [direct(), ctas()] {
            let h = harness(0).await;
            let output = h
                .session
                .executor()
                .read_sql_query("SELECT * FROM t", &options.with_chunksize(3))
                .await
                .unwrap();
            assert!(chunk_sizes(output).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_empty_ctas_table_keeps_schema() {
        let h = harness(0).await;
        let table = h
            .session
            .executor()
            .read_sql_query("SELECT * FROM t", &ctas())
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.schema().field(0).data_type(), &DataType::Int64);
    }

    #[tokio::test]
    async fn test_direct_pages_are_typed() {
        let h = harness(5).await;
        let table = h
            .session
            .executor()
            .read_sql_query("SELECT * FROM t", &direct())
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 5);
        assert_eq!(h.athena.result_fetches.load(Ordering::SeqCst), 2);
        let ids = table.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(sum(ids), Some(10));
    }

    #[tokio::test]
    async fn test_ctas_drops_temp_table() {
        let h = harness(3).await;
        let options = ctas().with_ctas_temp_table_name("my_temp");
        let table = h
            .session
            .executor()
            .read_sql_query("SELECT * FROM t", &options)
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 3);
        assert!(h.athena.last_query().starts_with("CREATE TABLE \"db\".\"my_temp\""));
        assert!(h.athena.last_query().contains("external_location = 's3://results/my_temp/'"));
        assert!(h.catalog.get_table("db", "my_temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ctas_enforced_workgroup_omits_location() {
        let h = harness_with(
            2,
            WorkgroupConfig {
                output_location: Some("s3://enforced/".into()),
                enforced: true,
                ..WorkgroupConfig::default()
            },
        )
        .await;
        let table = h
            .session
            .executor()
            .read_sql_query("SELECT * FROM t", &ctas())
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 2);
        assert!(!h.athena.last_query().contains("external_location"));
    }

    #[tokio::test]
    async fn test_ctas_requires_database() {
        let h = harness(1).await;
        let err = h
            .session
            .executor()
            .read_sql_query("SELECT 1", &QueryOptions::new().with_ctas_approach(true))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(h.athena.started(), 0);
    }

    #[tokio::test]
    async fn test_result_files_removed_unless_kept() {
        let h = harness(2).await;
        let executor = h.session.executor();

        executor
            .read_sql_query("SELECT * FROM t", &ctas().with_keep_files(false))
            .await
            .unwrap();
        assert!(h.storage.list("s3://results/").await.unwrap().is_empty());

        executor
            .read_sql_query("SELECT name FROM t", &ctas().with_keep_files(true))
            .await
            .unwrap();
        let kept = h.storage.list("s3://results/").await.unwrap();
        assert!(kept.iter().any(|f| f.ends_with("-manifest.csv")));
        assert!(kept.iter().any(|f| f.ends_with(".parquet")));
    }

    #[tokio::test]
    async fn test_failed_query() {
        let h = harness(1).await;
        h.athena
            .fail_next(QueryState::Failed, "SYNTAX_ERROR: line 1:8: Column 'x' cannot be resolved");
        let err = h
            .session
            .executor()
            .read_sql_query("SELECT x FROM t", &direct())
            .await
            .unwrap_err();
        match err {
            Error::Query(QueryError::Failed { reason, .. }) => {
                assert!(reason.contains("SYNTAX_ERROR"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ctas_unnamed_column_is_invalid_argument() {
        let h = harness(1).await;
        h.athena
            .fail_next(QueryState::Failed, "Column name not specified at position 1");
        let err = h
            .session
            .executor()
            .read_sql_query("SELECT 1", &ctas())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidArgumentValue(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let h = harness(1).await;
        let executor = h.session.executor();
        *h.athena.hold.lock() = true;

        let id = executor
            .start_query_execution("SELECT * FROM t", &direct())
            .await
            .unwrap();
        executor.stop_query_execution(&id).await.unwrap();

        let err = executor.wait_query(&id).await.unwrap_err();
        assert!(matches!(err, Error::Query(QueryError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_read_sql_table_and_repair() {
        let h = harness(3).await;
        let executor = h.session.executor();

        let table = executor
            .read_sql_table("events", "db", &direct())
            .await
            .unwrap()
            .into_table()
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(h.athena.last_query(), "SELECT * FROM \"events\"");

        let state = executor.repair_table("events", &direct()).await.unwrap();
        assert_eq!(state, QueryState::Succeeded);
        assert_eq!(h.athena.last_query(), "MSCK REPAIR TABLE `events`;");
    }

    #[tokio::test]
    async fn test_missing_output_location() {
        let h = harness(1).await;
        let session = h.session.clone().with_config(Config::default());
        let err = session
            .executor()
            .read_sql_query("SELECT 1", &direct())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

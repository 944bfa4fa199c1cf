//! Query execution controller.
//!
//! Submits queries, polls them to a terminal state with backoff, and reads
//! results through one of two paths:
//! - CTAS: the query is materialized as a temporary parquet table whose catalog
//!   entry is dropped as soon as the execution finishes; composite types survive
//! - direct: rows come from the service's paginated result API; composite
//!   columns are rejected
//!
//! A valid cache hit skips submission entirely.

use crate::athena::cache::{check_cache, normalize_sql, CacheContext};
use crate::athena::ctas::{self, manifest_location, metadata_location, parse_ctas_select};
use crate::athena::results::{ChunkedResult, QueryOutput};
use crate::athena::{QueryExecution, QueryRequest, QueryService, QueryState, StatementType};
use crate::config::EncryptionOption;
use crate::error::QueryError;
use crate::schema::TableSchema;
use crate::session::Session;
use crate::storage::ensure_trailing_slash;
use crate::{Error, Result};
use arrow::datatypes::{Field, Schema, SchemaRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call query options. Unset fields fall back to the session configuration.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Database context (required for the CTAS approach)
    pub database: Option<String>,
    /// Materialize through a temporary CTAS table
    pub ctas_approach: Option<bool>,
    /// Return batches of this many rows instead of one table
    pub chunksize: Option<usize>,
    /// Result location
    pub s3_output: Option<String>,
    /// Workgroup
    pub workgroup: Option<String>,
    /// Result encryption
    pub encryption: Option<EncryptionOption>,
    /// KMS key
    pub kms_key: Option<String>,
    /// Keep CTAS result files after consumption
    pub keep_files: Option<bool>,
    /// Temp table name instead of a generated one
    pub ctas_temp_table_name: Option<String>,
    /// Maximum cache age, 0 disables the cache
    pub max_cache_seconds: Option<u64>,
    /// Executions inspected by the cache
    pub max_cache_query_inspections: Option<usize>,
}

impl QueryOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Choose the CTAS or direct path.
    pub fn with_ctas_approach(mut self, enabled: bool) -> Self {
        self.ctas_approach = Some(enabled);
        self
    }

    /// Return chunked results.
    pub fn with_chunksize(mut self, chunksize: usize) -> Self {
        self.chunksize = Some(chunksize);
        self
    }

    /// Set the result location.
    pub fn with_s3_output(mut self, s3_output: impl Into<String>) -> Self {
        self.s3_output = Some(s3_output.into());
        self
    }

    /// Set the workgroup.
    pub fn with_workgroup(mut self, workgroup: impl Into<String>) -> Self {
        self.workgroup = Some(workgroup.into());
        self
    }

    /// Set result encryption.
    pub fn with_encryption(mut self, encryption: EncryptionOption, kms_key: Option<String>) -> Self {
        self.encryption = Some(encryption);
        self.kms_key = kms_key;
        self
    }

    /// Keep or delete CTAS result files.
    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = Some(keep);
        self
    }

    /// Name the temp table.
    pub fn with_ctas_temp_table_name(mut self, name: impl Into<String>) -> Self {
        self.ctas_temp_table_name = Some(name.into());
        self
    }

    /// Set the cache age.
    pub fn with_max_cache_seconds(mut self, seconds: u64) -> Self {
        self.max_cache_seconds = Some(seconds);
        self
    }

    /// Set how many executions the cache inspects.
    pub fn with_max_cache_query_inspections(mut self, count: usize) -> Self {
        self.max_cache_query_inspections = Some(count);
        self
    }
}

/// Resolved submission settings.
#[derive(Debug, Clone)]
struct ExecutionContext {
    workgroup: String,
    output_location: String,
    enforced: bool,
    encryption: Option<EncryptionOption>,
    kms_key: Option<String>,
}

/// Runs queries for a session.
#[derive(Clone)]
pub struct QueryExecutor {
    session: Session,
}

impl QueryExecutor {
    /// Create an executor over a session.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn service(&self) -> Result<Arc<dyn QueryService>> {
        self.session.queries()
    }

    async fn context(&self, options: &QueryOptions) -> Result<ExecutionContext> {
        let athena = &self.session.config().athena;
        let workgroup = options
            .workgroup
            .clone()
            .unwrap_or_else(|| athena.workgroup.clone());
        let settings = self.service()?.workgroup_config(&workgroup).await?;

        let output_location = options
            .s3_output
            .clone()
            .or_else(|| settings.output_location.clone())
            .or_else(|| athena.s3_output.clone())
            .map(|o| ensure_trailing_slash(&o))
            .ok_or_else(|| {
                Error::Config(format!(
                    "No query output location: pass s3_output, configure workgroup {} or set athena.s3_output",
                    workgroup
                ))
            })?;

        Ok(ExecutionContext {
            workgroup,
            output_location,
            enforced: settings.enforced,
            encryption: options.encryption.or(athena.encryption),
            kms_key: options.kms_key.clone().or_else(|| athena.kms_key.clone()),
        })
    }

    async fn submit(
        &self,
        sql: &str,
        database: Option<&str>,
        context: &ExecutionContext,
    ) -> Result<String> {
        let request = QueryRequest {
            sql: sql.to_string(),
            database: database.map(str::to_string),
            workgroup: Some(context.workgroup.clone()),
            output_location: Some(context.output_location.clone()),
            encryption: context.encryption,
            kms_key: context.kms_key.clone(),
        };
        let id = self.service()?.start_query_execution(&request).await?;
        info!(
            query_execution_id = %id,
            workgroup = %context.workgroup,
            database = ?database,
            "Submitted query"
        );
        Ok(id)
    }

    /// Submit `sql` and return its execution ID without waiting.
    pub async fn start_query_execution(&self, sql: &str, options: &QueryOptions) -> Result<String> {
        let context = self.context(options).await?;
        self.submit(sql, options.database.as_deref(), &context).await
    }

    /// Poll an execution until it reaches a terminal state.
    ///
    /// `FAILED` becomes [`QueryError::Failed`] with the service diagnostic and
    /// `CANCELLED` becomes [`QueryError::Cancelled`].
    pub async fn wait_query(&self, query_execution_id: &str) -> Result<QueryExecution> {
        let athena = &self.session.config().athena;
        let mut interval = Duration::from_millis(athena.poll_interval_ms);
        let ceiling = Duration::from_millis(athena.max_poll_interval_ms).max(interval);
        let service = self.service()?;

        loop {
            let execution = service.get_query_execution(query_execution_id).await?;
            match execution.state {
                QueryState::Succeeded => return Ok(execution),
                QueryState::Failed => {
                    return Err(QueryError::Failed {
                        query_execution_id: query_execution_id.to_string(),
                        reason: execution.state_change_reason.unwrap_or_default(),
                    }
                    .into())
                }
                QueryState::Cancelled => {
                    return Err(QueryError::Cancelled {
                        query_execution_id: query_execution_id.to_string(),
                    }
                    .into())
                }
                QueryState::Queued | QueryState::Running => {
                    debug!(
                        query_execution_id = %query_execution_id,
                        state = %execution.state,
                        wait_ms = interval.as_millis() as u64,
                        "Query not finished"
                    );
                    tokio::time::sleep(interval).await;
                    interval = interval.mul_f64(1.5).min(ceiling);
                }
            }
        }
    }

    /// Request cancellation. Awaiting the execution afterwards yields
    /// [`QueryError::Cancelled`] once the service reports it.
    pub async fn stop_query_execution(&self, query_execution_id: &str) -> Result<()> {
        self.service()?
            .stop_query_execution(query_execution_id)
            .await
    }

    /// Run `MSCK REPAIR TABLE` and wait for it.
    pub async fn repair_table(&self, table: &str, options: &QueryOptions) -> Result<QueryState> {
        let sql = format!("MSCK REPAIR TABLE `{}`;", table);
        let id = self.start_query_execution(&sql, options).await?;
        Ok(self.wait_query(&id).await?.state)
    }

    /// Read a whole table.
    pub async fn read_sql_table(
        &self,
        table: &str,
        database: &str,
        options: &QueryOptions,
    ) -> Result<QueryOutput> {
        let options = options.clone().with_database(database);
        self.read_sql_query(&format!("SELECT * FROM \"{}\"", table), &options)
            .await
    }

    /// Run `sql` and read its results.
    pub async fn read_sql_query(&self, sql: &str, options: &QueryOptions) -> Result<QueryOutput> {
        if options.chunksize == Some(0) {
            return Err(Error::invalid_value("chunksize must be at least 1"));
        }

        let athena = &self.session.config().athena;
        let service = self.service()?;
        let workgroup = options
            .workgroup
            .clone()
            .unwrap_or_else(|| athena.workgroup.clone());

        let cache = check_cache(
            service.as_ref(),
            self.session.storage(),
            sql,
            &CacheContext {
                database: options.database.as_deref(),
                workgroup: &workgroup,
                max_cache_seconds: options.max_cache_seconds.unwrap_or(athena.max_cache_seconds),
                max_cache_query_inspections: options
                    .max_cache_query_inspections
                    .unwrap_or(athena.max_cache_query_inspections),
            },
        )
        .await;

        if let (true, Some(execution)) = (cache.valid, cache.execution) {
            info!(query_execution_id = %execution.id, "Reading results of cached execution");
            return self.read_execution(execution, options, None).await;
        }

        if options.ctas_approach.unwrap_or(athena.ctas_approach) {
            self.read_via_ctas(sql, options).await
        } else {
            self.read_direct(sql, options).await
        }
    }

    async fn read_direct(&self, sql: &str, options: &QueryOptions) -> Result<QueryOutput> {
        let context = self.context(options).await?;
        let id = self
            .submit(&normalize_sql(sql), options.database.as_deref(), &context)
            .await?;
        let execution = self.wait_query(&id).await?;
        self.read_execution(execution, options, None).await
    }

    async fn read_via_ctas(&self, sql: &str, options: &QueryOptions) -> Result<QueryOutput> {
        let database = options.database.as_deref().ok_or_else(|| {
            Error::invalid_combination("ctas_approach requires a database")
        })?;
        let context = self.context(options).await?;
        let table = options
            .ctas_temp_table_name
            .clone()
            .unwrap_or_else(ctas::temp_table_name);

        let external_location = (!context.enforced)
            .then(|| format!("{}{}/", context.output_location, table));
        let statement = ctas::build_ctas(
            database,
            &table,
            &normalize_sql(sql),
            external_location.as_deref(),
        );

        let id = self.submit(&statement, Some(database), &context).await?;
        let execution = match self.wait_query(&id).await {
            Ok(execution) => execution,
            Err(e) => {
                self.drop_temp_table(database, &table).await;
                return Err(ctas::map_ctas_failure(e));
            }
        };

        let schema = match self.session.catalog().get_table(database, &table).await {
            Ok(definition) => definition.map(|d| arrow_schema(&d.schema)),
            Err(e) => {
                warn!(table = %table, error = %e, "Failed to read temp table schema");
                None
            }
        };
        self.drop_temp_table(database, &table).await;

        self.read_execution(execution, options, schema).await
    }

    async fn drop_temp_table(&self, database: &str, table: &str) {
        match self.session.catalog().delete_table(database, table).await {
            Ok(true) => debug!(database = %database, table = %table, "Dropped temp table"),
            Ok(false) => {}
            Err(e) => warn!(
                database = %database,
                table = %table,
                error = %e,
                "Failed to drop temp table"
            ),
        }
    }

    async fn read_execution(
        &self,
        execution: QueryExecution,
        options: &QueryOptions,
        schema: Option<SchemaRef>,
    ) -> Result<QueryOutput> {
        let chunksize = options.chunksize.unwrap_or(usize::MAX);
        let is_ctas = execution.statement_type == StatementType::Ddl
            && parse_ctas_select(&execution.query).is_some();

        let chunks = match (&execution.output_location, is_ctas) {
            (Some(output), true) => {
                let manifest = manifest_location(output);
                let storage = self.session.storage().clone();
                let listing = storage.read(&manifest).await?;
                let files: Vec<String> = String::from_utf8_lossy(&listing)
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();

                let mut cleanup = files.clone();
                cleanup.push(manifest);
                cleanup.push(metadata_location(output));

                debug!(
                    query_execution_id = %execution.id,
                    files = files.len(),
                    "Reading CTAS result files"
                );
                let keep_files = options
                    .keep_files
                    .unwrap_or(self.session.config().athena.keep_files);
                ChunkedResult::from_files(storage, files, cleanup, keep_files, chunksize, schema)
            }
            _ => ChunkedResult::from_pages(self.service()?, execution.id.clone(), chunksize),
        };

        match options.chunksize {
            Some(_) => Ok(QueryOutput::Chunks(chunks)),
            None => Ok(QueryOutput::Table(chunks.into_table().await?)),
        }
    }
}

fn arrow_schema(schema: &TableSchema) -> SchemaRef {
    Arc::new(Schema::new(
        schema
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.column_type.to_arrow(), true))
            .collect::<Vec<_>>(),
    ))
}

//! Query result materialization.
//!
//! Results come either from the service's paginated result API or from the
//! parquet files of a CTAS execution. [`ChunkedResult`] re-slices them into
//! fixed-size batches in row order; the last batch may be smaller and an empty
//! result yields no batch at all.

use crate::athena::{QueryService, ResultColumn};
use crate::codec;
use crate::storage::ObjectStorage;
use crate::Result;
use arrow::array::{new_null_array, ArrayRef, RecordBatch, StringArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use futures::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a query read.
pub enum QueryOutput {
    /// Fully materialized result
    Table(RecordBatch),
    /// Lazily fetched batches
    Chunks(ChunkedResult),
}

impl fmt::Debug for QueryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutput::Table(batch) => f
                .debug_struct("Table")
                .field("rows", &batch.num_rows())
                .finish(),
            QueryOutput::Chunks(chunks) => f.debug_tuple("Chunks").field(chunks).finish(),
        }
    }
}

impl QueryOutput {
    /// Materialize the whole result.
    pub async fn into_table(self) -> Result<RecordBatch> {
        match self {
            QueryOutput::Table(batch) => Ok(batch),
            QueryOutput::Chunks(chunks) => chunks.into_table().await,
        }
    }
}

/// Arrow type for an Athena result type.
///
/// Composite types cannot be represented in direct results.
pub(crate) fn arrow_type(column: &ResultColumn) -> Result<DataType> {
    let data_type = match column.type_name.to_lowercase().as_str() {
        "boolean" => DataType::Boolean,
        "tinyint" => DataType::Int8,
        "smallint" => DataType::Int16,
        "integer" | "int" => DataType::Int32,
        "bigint" => DataType::Int64,
        "float" | "real" => DataType::Float32,
        "double" => DataType::Float64,
        "decimal" => DataType::Decimal128(
            u8::try_from(column.precision).unwrap_or(38),
            i8::try_from(column.scale).unwrap_or(0),
        ),
        "date" => DataType::Date32,
        "timestamp" => DataType::Timestamp(TimeUnit::Millisecond, None),
        "unknown" => DataType::Null,
        "array" | "row" | "map" | "json" => {
            return Err(crate::Error::unsupported_type(format!(
                "Column '{}' has type {} which is not supported without the CTAS approach",
                column.name, column.type_name
            )))
        }
        _ => DataType::Utf8,
    };
    Ok(data_type)
}

/// Arrow schema for result columns.
pub(crate) fn result_schema(columns: &[ResultColumn]) -> Result<SchemaRef> {
    let fields = columns
        .iter()
        .map(|c| Ok(Field::new(&c.name, arrow_type(c)?, true)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// Convert string rows to a batch of `schema`.
pub(crate) fn rows_to_batch(schema: &SchemaRef, rows: &[Vec<Option<String>>]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            if field.data_type() == &DataType::Null {
                return Ok(new_null_array(&DataType::Null, rows.len()));
            }
            let strings: StringArray = rows
                .iter()
                .map(|row| row.get(i).cloned().flatten())
                .collect();
            let array: ArrayRef = Arc::new(strings);
            if field.data_type() == &DataType::Utf8 {
                Ok(array)
            } else {
                Ok(cast(&array, field.data_type())?)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

enum Source {
    Pages {
        service: Arc<dyn QueryService>,
        query_execution_id: String,
        next_token: Option<String>,
        exhausted: bool,
    },
    Files {
        storage: Arc<ObjectStorage>,
        files: VecDeque<String>,
        cleanup: Vec<String>,
        keep_files: bool,
    },
}

/// Finite, non-restartable sequence of result batches.
pub struct ChunkedResult {
    source: Source,
    chunksize: usize,
    schema: Option<SchemaRef>,
    fallback_schema: Option<SchemaRef>,
    pending: VecDeque<RecordBatch>,
    pending_rows: usize,
    source_done: bool,
    closed: bool,
}

impl fmt::Debug for ChunkedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedResult")
            .field("chunksize", &self.chunksize)
            .field("pending_rows", &self.pending_rows)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ChunkedResult {
    /// Batches read from a succeeded execution's result pages.
    pub fn from_pages(
        service: Arc<dyn QueryService>,
        query_execution_id: impl Into<String>,
        chunksize: usize,
    ) -> Self {
        Self::new(
            Source::Pages {
                service,
                query_execution_id: query_execution_id.into(),
                next_token: None,
                exhausted: false,
            },
            chunksize,
            None,
        )
    }

    /// Batches read from parquet files.
    ///
    /// Unless `keep_files` is set, `cleanup` (files, manifest) is deleted once the
    /// sequence is exhausted or closed. `schema` describes an empty result.
    pub fn from_files(
        storage: Arc<ObjectStorage>,
        files: Vec<String>,
        cleanup: Vec<String>,
        keep_files: bool,
        chunksize: usize,
        schema: Option<SchemaRef>,
    ) -> Self {
        Self::new(
            Source::Files {
                storage,
                files: files.into(),
                cleanup,
                keep_files,
            },
            chunksize,
            schema,
        )
    }

    fn new(source: Source, chunksize: usize, schema: Option<SchemaRef>) -> Self {
        Self {
            source,
            chunksize: chunksize.max(1),
            schema: None,
            fallback_schema: schema,
            pending: VecDeque::new(),
            pending_rows: 0,
            source_done: false,
            closed: false,
        }
    }

    /// Schema of the result, once known.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone().or_else(|| self.fallback_schema.clone())
    }

    /// Whether another batch is available.
    pub async fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.fill(1).await?;
        if self.pending_rows == 0 {
            self.close().await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Next batch of up to `chunksize` rows, `None` when exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<RecordBatch>> {
        if self.closed {
            return Ok(None);
        }
        self.fill(self.chunksize).await?;
        if self.pending_rows == 0 {
            self.close().await?;
            return Ok(None);
        }

        let take = self.chunksize.min(self.pending_rows);
        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => self.pending[0].schema(),
        };
        let merged = concat_batches(&schema, self.pending.iter())?;
        self.pending.clear();

        let chunk = merged.slice(0, take);
        let rest = merged.num_rows() - take;
        if rest > 0 {
            self.pending.push_back(merged.slice(take, rest));
        }
        self.pending_rows = rest;
        Ok(Some(chunk))
    }

    /// Stop consuming and release the result files when they are not kept.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();
        self.pending_rows = 0;

        if let Source::Files {
            storage,
            cleanup,
            keep_files: false,
            ..
        } = &self.source
        {
            storage.delete(cleanup).await?;
            debug!(count = cleanup.len(), "Deleted query result files");
        }
        Ok(())
    }

    /// Every remaining batch.
    pub async fn collect(mut self) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_chunk().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Every remaining row as one batch.
    pub async fn into_table(mut self) -> Result<RecordBatch> {
        self.chunksize = usize::MAX;
        let batches = self.next_chunk().await?;
        let schema = self.schema();
        self.close().await?;
        match (batches, schema) {
            (Some(batch), _) => Ok(batch),
            (None, Some(schema)) => Ok(RecordBatch::new_empty(schema)),
            (None, None) => Ok(RecordBatch::new_empty(Arc::new(Schema::empty()))),
        }
    }

    /// Consume as a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<RecordBatch>> {
        futures::stream::try_unfold(self, |mut chunks| async move {
            Ok(chunks.next_chunk().await?.map(|batch| (batch, chunks)))
        })
    }

    async fn fill(&mut self, rows: usize) -> Result<()> {
        while self.pending_rows < rows && !self.source_done {
            match self.fetch().await? {
                Some(batch) if batch.num_rows() > 0 => {
                    self.pending_rows += batch.num_rows();
                    self.pending.push_back(batch);
                }
                Some(_) => {}
                None => self.source_done = true,
            }
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<RecordBatch>> {
        match &mut self.source {
            Source::Pages {
                service,
                query_execution_id,
                next_token,
                exhausted,
            } => {
                if *exhausted {
                    return Ok(None);
                }
                let page = service
                    .get_query_results(query_execution_id, next_token.take())
                    .await?;
                *exhausted = page.next_token.is_none();
                *next_token = page.next_token;

                let schema = match &self.schema {
                    Some(schema) => schema.clone(),
                    None => {
                        let schema = result_schema(&page.columns)?;
                        self.schema = Some(schema.clone());
                        schema
                    }
                };
                debug!(rows = page.rows.len(), "Fetched result page");
                Ok(Some(rows_to_batch(&schema, &page.rows)?))
            }
            Source::Files { storage, files, .. } => {
                let Some(file) = files.pop_front() else {
                    return Ok(None);
                };
                let data = storage.read(&file).await?;
                let (schema, batches) = codec::decode_parquet(data)?;
                if self.schema.is_none() {
                    self.schema = Some(schema.clone());
                }
                if batches.is_empty() {
                    return Ok(Some(RecordBatch::new_empty(schema)));
                }
                Ok(Some(concat_batches(&schema, &batches)?))
            }
        }
    }
}

impl Drop for ChunkedResult {
    fn drop(&mut self) {
        if !self.closed {
            if let Source::Files {
                keep_files: false,
                cleanup,
                ..
            } = &self.source
            {
                if !cleanup.is_empty() {
                    warn!(
                        count = cleanup.len(),
                        "Chunked result dropped before it was exhausted or closed, result files were kept"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, type_name: &str) -> ResultColumn {
        ResultColumn {
            name: name.into(),
            type_name: type_name.into(),
            precision: 0,
            scale: 0,
        }
    }

    #[test]
    fn test_arrow_types() {
        assert_eq!(arrow_type(&column("a", "bigint")).unwrap(), DataType::Int64);
        assert_eq!(arrow_type(&column("a", "varchar")).unwrap(), DataType::Utf8);
        assert_eq!(arrow_type(&column("a", "unknown")).unwrap(), DataType::Null);
        assert!(arrow_type(&column("a", "array")).unwrap_err().is_validation());
        assert!(arrow_type(&column("a", "row")).unwrap_err().is_validation());
    }

    #[test]
    fn test_rows_to_batch() {
        let schema = result_schema(&[
            column("id", "bigint"),
            column("flag", "boolean"),
            column("name", "varchar"),
            column("n", "unknown"),
        ])
        .unwrap();
        let rows = vec![
            vec![Some("1".into()), Some("true".into()), Some("a".into()), None],
            vec![None, Some("false".into()), None, None],
        ];
        let batch = rows_to_batch(&schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).data_type(), &DataType::Int64);
        assert_eq!(batch.column(0).null_count(), 1);
        assert_eq!(batch.column(3).data_type(), &DataType::Null);
    }
}

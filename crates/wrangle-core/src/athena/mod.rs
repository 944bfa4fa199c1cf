//! Query execution over Amazon Athena.
//!
//! This module provides:
//! - [`QueryService`]: the asynchronous query service interface
//! - [`AthenaClient`]: the AWS SDK implementation
//! - [`cache`]: reuse of recent identical executions
//! - [`QueryExecutor`]: submission, polling, CTAS and direct result paths
//! - [`ChunkedResult`]: lazy, finite, non-restartable result batches

pub mod cache;
mod client;
pub mod ctas;
mod executor;
mod results;

pub use cache::{check_cache, normalize_sql, CacheInfo};
pub use client::AthenaClient;
pub use executor::{QueryExecutor, QueryOptions};
pub use results::{ChunkedResult, QueryOutput};

use crate::config::EncryptionOption;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Accepted, not yet running
    Queued,
    /// Running
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled by request
    Cancelled,
}

impl QueryState {
    /// Whether the execution will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled
        )
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Statement kind reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// Queries
    Dml,
    /// Table definitions, including CTAS
    Ddl,
    /// Anything else
    Utility,
}

/// A submitted query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecution {
    /// Execution ID
    pub id: String,
    /// SQL as submitted
    pub query: String,
    /// Statement kind
    pub statement_type: StatementType,
    /// Database the query ran in
    pub database: Option<String>,
    /// Workgroup
    pub workgroup: Option<String>,
    /// Result location (`.csv` file for DML, prefix for CTAS)
    pub output_location: Option<String>,
    /// Current state
    pub state: QueryState,
    /// Diagnostic for failed or cancelled executions
    pub state_change_reason: Option<String>,
    /// Submission time
    pub submitted_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
}

/// Submission request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// SQL text
    pub sql: String,
    /// Database context
    pub database: Option<String>,
    /// Workgroup
    pub workgroup: Option<String>,
    /// Result location
    pub output_location: Option<String>,
    /// Result encryption
    pub encryption: Option<EncryptionOption>,
    /// KMS key for KMS encryption
    pub kms_key: Option<String>,
}

/// Result column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    /// Column name
    pub name: String,
    /// Athena type name (`varchar`, `bigint`, `decimal`, ...)
    pub type_name: String,
    /// Precision for decimals
    pub precision: i32,
    /// Scale for decimals
    pub scale: i32,
}

/// One page of direct results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    /// Column metadata
    pub columns: Vec<ResultColumn>,
    /// Rows as strings, `None` for nulls; no header row
    pub rows: Vec<Vec<Option<String>>>,
    /// Token of the next page
    pub next_token: Option<String>,
}

/// Workgroup settings that affect submissions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkgroupConfig {
    /// Configured result location
    pub output_location: Option<String>,
    /// Whether workgroup settings override client settings
    pub enforced: bool,
    /// Configured encryption
    pub encryption: Option<EncryptionOption>,
    /// Configured KMS key
    pub kms_key: Option<String>,
}

/// Asynchronous query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submit a query; returns its execution ID.
    async fn start_query_execution(&self, request: &QueryRequest) -> Result<String>;

    /// Current state of an execution.
    async fn get_query_execution(&self, id: &str) -> Result<QueryExecution>;

    /// One page of results of a succeeded DML execution.
    async fn get_query_results(&self, id: &str, next_token: Option<String>) -> Result<ResultPage>;

    /// Request cancellation.
    async fn stop_query_execution(&self, id: &str) -> Result<()>;

    /// Recent execution IDs of a workgroup, newest first.
    async fn list_query_executions(
        &self,
        workgroup: &str,
        next_token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)>;

    /// Details of several executions.
    async fn batch_get_query_execution(&self, ids: &[String]) -> Result<Vec<QueryExecution>>;

    /// Settings of a workgroup.
    async fn workgroup_config(&self, workgroup: &str) -> Result<WorkgroupConfig>;
}

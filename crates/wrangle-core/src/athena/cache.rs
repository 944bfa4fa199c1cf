//! Query result cache.
//!
//! Looks through a workgroup's recent executions, newest first, for a succeeded
//! execution of the same SQL that finished within the allowed age:
//! - SQL is compared after removing one trailing `;` and nothing else, so
//!   whitespace or case differences are different queries
//! - plain queries match on their text
//! - CTAS executions match on their inner SELECT and only while their result
//!   manifest still exists
//!
//! A failure to read the history is a miss, never an error.

use crate::athena::ctas::{manifest_location, parse_ctas_select};
use crate::athena::{QueryExecution, QueryService, QueryState, StatementType};
use crate::storage::ObjectStorage;
use crate::Result;
use chrono::Utc;
use tracing::{debug, warn};

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheInfo {
    /// Whether `execution` can be reused
    pub valid: bool,
    /// The reusable execution
    pub execution: Option<QueryExecution>,
}

impl CacheInfo {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(execution: QueryExecution) -> Self {
        Self {
            valid: true,
            execution: Some(execution),
        }
    }
}

/// Where and how far to look.
#[derive(Debug, Clone)]
pub struct CacheContext<'a> {
    /// Database the query runs in
    pub database: Option<&'a str>,
    /// Workgroup whose history is inspected
    pub workgroup: &'a str,
    /// Maximum age of a reusable execution; 0 disables the cache
    pub max_cache_seconds: u64,
    /// Maximum number of executions inspected
    pub max_cache_query_inspections: usize,
}

/// Remove trailing whitespace and one trailing statement terminator.
pub fn normalize_sql(sql: &str) -> String {
    let trimmed = sql.trim_end();
    trimmed
        .strip_suffix(';')
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

/// Find a reusable execution of `sql`.
pub async fn check_cache(
    service: &dyn QueryService,
    storage: &ObjectStorage,
    sql: &str,
    context: &CacheContext<'_>,
) -> CacheInfo {
    if context.max_cache_seconds == 0 {
        return CacheInfo::miss();
    }

    let target = normalize_sql(sql);
    match search_history(service, storage, &target, context).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, workgroup = %context.workgroup, "Cache lookup failed, running the query");
            CacheInfo::miss()
        }
    }
}

async fn search_history(
    service: &dyn QueryService,
    storage: &ObjectStorage,
    target: &str,
    context: &CacheContext<'_>,
) -> Result<CacheInfo> {
    let now = Utc::now();
    let max_age = i64::try_from(context.max_cache_seconds).unwrap_or(i64::MAX);
    let mut inspected = 0;
    let mut next_token = None;

    loop {
        let (mut ids, token) = service
            .list_query_executions(context.workgroup, next_token)
            .await?;
        ids.truncate(context.max_cache_query_inspections.saturating_sub(inspected));
        if ids.is_empty() {
            break;
        }
        inspected += ids.len();

        let mut executions = service.batch_get_query_execution(&ids).await?;
        executions.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

        for execution in executions {
            if execution.state != QueryState::Succeeded {
                continue;
            }
            let Some(completed_at) = execution.completed_at else {
                continue;
            };
            if (now - completed_at).num_seconds() > max_age {
                debug!(inspected, "Reached executions older than the cache age");
                return Ok(CacheInfo::miss());
            }
            if context.database.is_some() && execution.database.as_deref() != context.database {
                continue;
            }
            if matches_query(storage, &execution, target).await? {
                debug!(query_execution_id = %execution.id, "Reusing cached execution");
                return Ok(CacheInfo::hit(execution));
            }
        }

        match token {
            Some(t) if inspected < context.max_cache_query_inspections => next_token = Some(t),
            _ => break,
        }
    }

    Ok(CacheInfo::miss())
}

async fn matches_query(
    storage: &ObjectStorage,
    execution: &QueryExecution,
    target: &str,
) -> Result<bool> {
    match execution.statement_type {
        StatementType::Dml => Ok(normalize_sql(&execution.query) == target),
        StatementType::Ddl => {
            let Some(inner) = parse_ctas_select(&execution.query) else {
                return Ok(false);
            };
            if normalize_sql(inner) != target {
                return Ok(false);
            }
            match &execution.output_location {
                Some(output) => storage.exists(&manifest_location(output)).await,
                None => Ok(false),
            }
        }
        StatementType::Utility => Ok(false),
    }
}

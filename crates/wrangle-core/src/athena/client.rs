//! Amazon Athena client.

use crate::athena::{
    QueryExecution, QueryRequest, QueryService, QueryState, ResultColumn, ResultPage,
    StatementType, WorkgroupConfig,
};
use crate::config::{AwsConfig, EncryptionOption};
use crate::error::QueryError;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_athena::error::DisplayErrorContext;
use aws_sdk_athena::types::{
    EncryptionConfiguration, EncryptionOption as SdkEncryption, QueryExecutionContext,
    QueryExecutionState, ResultConfiguration, StatementType as SdkStatementType,
};
use aws_sdk_athena::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// `BatchGetQueryExecution` accepts at most 50 IDs.
const BATCH_GET_LIMIT: usize = 50;

/// Athena query service client.
#[derive(Clone)]
pub struct AthenaClient {
    client: Client,
}

impl AthenaClient {
    /// Create a client for the configured region and credentials.
    pub async fn new(aws: &AwsConfig) -> Self {
        let sdk_config = crate::session::load_sdk_config(aws).await;
        info!(region = %aws.region, "Athena client initialized");
        Self::from_client(Client::new(&sdk_config))
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn service_error(action: &str, err: impl std::error::Error) -> Error {
        Error::Query(QueryError::Service(format!(
            "Failed to {}: {}",
            action,
            DisplayErrorContext(err)
        )))
    }

    fn to_sdk_encryption(option: EncryptionOption) -> SdkEncryption {
        match option {
            EncryptionOption::SseS3 => SdkEncryption::SseS3,
            EncryptionOption::SseKms => SdkEncryption::SseKms,
            EncryptionOption::CseKms => SdkEncryption::CseKms,
        }
    }

    fn from_sdk_encryption(option: &SdkEncryption) -> Option<EncryptionOption> {
        match option {
            SdkEncryption::SseS3 => Some(EncryptionOption::SseS3),
            SdkEncryption::SseKms => Some(EncryptionOption::SseKms),
            SdkEncryption::CseKms => Some(EncryptionOption::CseKms),
            _ => None,
        }
    }

    fn to_datetime(value: &aws_sdk_athena::primitives::DateTime) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(value.secs(), value.subsec_nanos())
    }

    fn convert_execution(
        execution: &aws_sdk_athena::types::QueryExecution,
    ) -> QueryExecution {
        let status = execution.status();
        let state = match status.and_then(|s| s.state()) {
            Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
            Some(QueryExecutionState::Failed) => QueryState::Failed,
            Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
            Some(QueryExecutionState::Running) => QueryState::Running,
            _ => QueryState::Queued,
        };
        let statement_type = match execution.statement_type() {
            Some(SdkStatementType::Ddl) => StatementType::Ddl,
            Some(SdkStatementType::Dml) => StatementType::Dml,
            _ => StatementType::Utility,
        };

        QueryExecution {
            id: execution.query_execution_id().unwrap_or_default().to_string(),
            query: execution.query().unwrap_or_default().to_string(),
            statement_type,
            database: execution
                .query_execution_context()
                .and_then(|c| c.database())
                .map(str::to_string),
            workgroup: execution.work_group().map(str::to_string),
            output_location: execution
                .result_configuration()
                .and_then(|r| r.output_location())
                .map(str::to_string),
            state,
            state_change_reason: status
                .and_then(|s| s.state_change_reason())
                .map(str::to_string),
            submitted_at: status
                .and_then(|s| s.submission_date_time())
                .and_then(Self::to_datetime),
            completed_at: status
                .and_then(|s| s.completion_date_time())
                .and_then(Self::to_datetime),
        }
    }
}

#[async_trait]
impl QueryService for AthenaClient {
    async fn start_query_execution(&self, request: &QueryRequest) -> Result<String> {
        let encryption = match request.encryption {
            Some(option) => Some(
                EncryptionConfiguration::builder()
                    .encryption_option(Self::to_sdk_encryption(option))
                    .set_kms_key(request.kms_key.clone())
                    .build()
                    .map_err(|e| {
                        Error::Config(format!("Failed to build encryption configuration: {}", e))
                    })?,
            ),
            None => None,
        };

        let result_configuration = ResultConfiguration::builder()
            .set_output_location(request.output_location.clone())
            .set_encryption_configuration(encryption)
            .build();

        let output = self
            .client
            .start_query_execution()
            .query_string(&request.sql)
            .set_query_execution_context(request.database.as_ref().map(|db| {
                QueryExecutionContext::builder().database(db).build()
            }))
            .result_configuration(result_configuration)
            .set_work_group(request.workgroup.clone())
            .send()
            .await
            .map_err(|e| Self::service_error("start query execution", e))?;

        let id = output
            .query_execution_id()
            .ok_or_else(|| QueryError::Service("Athena returned no query execution ID".into()))?
            .to_string();

        debug!(query_execution_id = %id, "Started query execution");
        Ok(id)
    }

    async fn get_query_execution(&self, id: &str) -> Result<QueryExecution> {
        let output = self
            .client
            .get_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .map_err(|e| Self::service_error("get query execution", e))?;

        output
            .query_execution()
            .map(Self::convert_execution)
            .ok_or_else(|| QueryError::Service(format!("Query execution {} not found", id)).into())
    }

    async fn get_query_results(&self, id: &str, next_token: Option<String>) -> Result<ResultPage> {
        let first_page = next_token.is_none();
        let output = self
            .client
            .get_query_results()
            .query_execution_id(id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| Self::service_error("get query results", e))?;

        let Some(result_set) = output.result_set() else {
            return Ok(ResultPage {
                next_token: output.next_token().map(str::to_string),
                ..Default::default()
            });
        };

        let columns: Vec<ResultColumn> = result_set
            .result_set_metadata()
            .map(|m| m.column_info())
            .unwrap_or_default()
            .iter()
            .map(|c| ResultColumn {
                name: c.name().to_string(),
                type_name: c.r#type().to_string(),
                precision: c.precision(),
                scale: c.scale(),
            })
            .collect();

        let mut rows: Vec<Vec<Option<String>>> = result_set
            .rows()
            .iter()
            .map(|row| {
                row.data()
                    .iter()
                    .map(|d| d.var_char_value().map(str::to_string))
                    .collect()
            })
            .collect();

        // The first page of a DML result repeats the column labels as a row.
        let is_header = |row: &Vec<Option<String>>| {
            row.len() == columns.len()
                && row
                    .iter()
                    .zip(&columns)
                    .all(|(v, c)| v.as_deref() == Some(c.name.as_str()))
        };
        if first_page && rows.first().is_some_and(is_header) {
            rows.remove(0);
        }

        Ok(ResultPage {
            columns,
            rows,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn stop_query_execution(&self, id: &str) -> Result<()> {
        self.client
            .stop_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .map_err(|e| Self::service_error("stop query execution", e))?;
        info!(query_execution_id = %id, "Requested query cancellation");
        Ok(())
    }

    async fn list_query_executions(
        &self,
        workgroup: &str,
        next_token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let output = self
            .client
            .list_query_executions()
            .work_group(workgroup)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| Self::service_error("list query executions", e))?;

        Ok((
            output.query_execution_ids().to_vec(),
            output.next_token().map(str::to_string),
        ))
    }

    async fn batch_get_query_execution(&self, ids: &[String]) -> Result<Vec<QueryExecution>> {
        let mut executions = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_GET_LIMIT) {
            let output = self
                .client
                .batch_get_query_execution()
                .set_query_execution_ids(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| Self::service_error("batch get query executions", e))?;
            executions.extend(output.query_executions().iter().map(Self::convert_execution));
        }
        Ok(executions)
    }

    async fn workgroup_config(&self, workgroup: &str) -> Result<WorkgroupConfig> {
        let output = self
            .client
            .get_work_group()
            .work_group(workgroup)
            .send()
            .await
            .map_err(|e| Self::service_error("get workgroup", e))?;

        let Some(configuration) = output.work_group().and_then(|w| w.configuration()) else {
            return Ok(WorkgroupConfig::default());
        };
        let result = configuration.result_configuration();
        let encryption = result.and_then(|r| r.encryption_configuration());

        Ok(WorkgroupConfig {
            output_location: result
                .and_then(|r| r.output_location())
                .map(str::to_string),
            enforced: configuration
                .enforce_work_group_configuration()
                .unwrap_or(false),
            encryption: encryption.and_then(|e| Self::from_sdk_encryption(e.encryption_option())),
            kms_key: encryption.and_then(|e| e.kms_key()).map(str::to_string),
        })
    }
}

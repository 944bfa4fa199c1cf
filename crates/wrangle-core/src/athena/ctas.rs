//! CTAS statement handling.

use crate::error::QueryError;
use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static CTAS_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+\S+\s+WITH\s*\([^)]*\)\s*AS\s+(.*)$")
        .expect("valid regex")
});

/// Generated temp table name.
pub fn temp_table_name() -> String {
    format!("temp_table_{}", uuid::Uuid::new_v4().simple())
}

/// `CREATE TABLE ... AS` wrapping `sql`.
///
/// `external_location` is omitted when the workgroup enforces its own output.
pub fn build_ctas(
    database: &str,
    table: &str,
    sql: &str,
    external_location: Option<&str>,
) -> String {
    let location = external_location
        .map(|l| format!(",\n    external_location = '{}'", l))
        .unwrap_or_default();
    format!(
        "CREATE TABLE \"{}\".\"{}\"\nWITH (\n    format = 'PARQUET',\n    parquet_compression = 'SNAPPY'{}\n) AS\n{}",
        database, table, location, sql
    )
}

/// The inner SELECT of a CTAS statement.
pub fn parse_ctas_select(query: &str) -> Option<&str> {
    CTAS_SELECT
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Manifest listing the data files of a CTAS execution.
pub fn manifest_location(output_location: &str) -> String {
    format!("{}-manifest.csv", output_location.trim_end_matches('/'))
}

/// Metadata file written next to a CTAS manifest.
pub fn metadata_location(output_location: &str) -> String {
    format!("{}.metadata", output_location.trim_end_matches('/'))
}

/// Turn a CTAS failure into a caller-facing error.
///
/// Missing column names and unknown column types come from the query, not the
/// service, and are reported as invalid arguments.
pub fn map_ctas_failure(err: Error) -> Error {
    let Error::Query(QueryError::Failed { reason, .. }) = &err else {
        return err;
    };
    if reason.contains("Column name not specified") {
        return Error::invalid_value(format!(
            "Please, define all column names in your query. ({})",
            reason
        ));
    }
    if reason.contains("Column type is unknown") {
        return Error::invalid_value(format!(
            "Please, define all columns types in your query, casting NULL values if needed. ({})",
            reason
        ));
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_build_and_parse() {
        let sql = "SELECT a, b FROM t WHERE x = 1";
        let stmt = build_ctas("db", "temp_table_1", sql, Some("s3://out/temp_table_1/"));
        assert!(stmt.starts_with("CREATE TABLE \"db\".\"temp_table_1\""));
        assert!(stmt.contains("external_location = 's3://out/temp_table_1/'"));
        assert_eq!(parse_ctas_select(&stmt), Some(sql));

        let enforced = build_ctas("db", "temp_table_1", sql, None);
        assert!(!enforced.contains("external_location"));
        assert_eq!(parse_ctas_select(&enforced), Some(sql));
    }

    #[test]
    fn test_parse_non_ctas() {
        assert_eq!(parse_ctas_select("SELECT 1"), None);
        assert_eq!(parse_ctas_select("CREATE TABLE t (a int)"), None);
    }

    #[test]
    fn test_temp_table_name() {
        let name = temp_table_name();
        assert!(name.starts_with("temp_table_"));
        assert_eq!(name.len(), "temp_table_".len() + 32);
    }

    #[test]
    fn test_locations() {
        assert_eq!(
            manifest_location("s3://out/tables/abc"),
            "s3://out/tables/abc-manifest.csv"
        );
        assert_eq!(
            metadata_location("s3://out/tables/abc"),
            "s3://out/tables/abc.metadata"
        );
    }

    #[test]
    fn test_failure_mapping() {
        let failed = |reason: &str| {
            Error::Query(QueryError::Failed {
                query_execution_id: "id".into(),
                reason: reason.into(),
            })
        };

        let err = map_ctas_failure(failed("line 1:8: Column name not specified at position 1"));
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidArgumentValue(_))
        ));
        let err = map_ctas_failure(failed("Column type is unknown: _col0"));
        assert!(err.is_validation());

        let err = map_ctas_failure(failed("SYNTAX_ERROR"));
        assert!(matches!(err, Error::Query(QueryError::Failed { .. })));
    }
}

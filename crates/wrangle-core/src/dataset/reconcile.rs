//! Schema reconciliation.
//!
//! Merges an incoming write's schema, parameters and comments with an existing
//! table definition:
//! - `overwrite` takes the incoming state verbatim
//! - `append` / `overwrite_partitions` take the union of columns; an existing
//!   column keeps its declared type, new columns are appended
//! - parameters and comments are upserted key-wise on merging modes
//!
//! Only declared types are negotiated here. Whether values fit the merged types
//! is a read-time concern.

use crate::catalog::TableDefinition;
use crate::dataset::WriteMode;
use crate::schema::TableSchema;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Caller-supplied table metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    /// Table parameters
    pub parameters: HashMap<String, String>,
    /// Column comments
    pub comments: HashMap<String, String>,
    /// Table description
    pub description: Option<String>,
}

/// State to persist after a write.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledState {
    /// Merged columns and partitions
    pub schema: TableSchema,
    /// Merged parameters
    pub parameters: HashMap<String, String>,
    /// Merged column comments
    pub comments: HashMap<String, String>,
    /// Description to store
    pub description: Option<String>,
    /// Columns the write adds to the table
    pub new_columns: Vec<String>,
    /// Whether the incoming schema agrees with the existing one on every shared
    /// column and on the partition keys
    pub is_compatible: bool,
}

/// Reconcile an incoming schema against an existing table under `mode`.
pub fn reconcile(
    existing: Option<&TableDefinition>,
    incoming: &TableSchema,
    mode: WriteMode,
    update: &MetadataUpdate,
) -> Result<ReconciledState> {
    let Some(existing) = existing else {
        return Ok(ReconciledState {
            schema: incoming.clone(),
            parameters: update.parameters.clone(),
            comments: update.comments.clone(),
            description: update.description.clone(),
            new_columns: incoming.columns.iter().map(|c| c.name.clone()).collect(),
            is_compatible: true,
        });
    };

    let is_compatible = is_compatible(&existing.schema, incoming);

    if mode == WriteMode::Overwrite {
        debug!(
            table = %existing.qualified_name(),
            is_compatible,
            "Replacing table definition"
        );
        return Ok(ReconciledState {
            schema: incoming.clone(),
            parameters: update.parameters.clone(),
            comments: update.comments.clone(),
            description: update.description.clone(),
            new_columns: incoming
                .columns
                .iter()
                .filter(|c| existing.schema.lookup(&c.name).is_none())
                .map(|c| c.name.clone())
                .collect(),
            is_compatible,
        });
    }

    if existing.schema.partition_names() != incoming.partition_names() {
        return Err(Error::invalid_combination(format!(
            "Table {} is partitioned by {:?}, the {} write uses {:?}",
            existing.qualified_name(),
            existing.schema.partition_names(),
            mode,
            incoming.partition_names()
        )));
    }

    let mut columns = existing.schema.columns.clone();
    let mut new_columns = Vec::new();
    for column in &incoming.columns {
        match existing.schema.column_type(&column.name) {
            Some(current) if *current != column.column_type => {
                debug!(
                    column = %column.name,
                    existing_type = %current,
                    incoming_type = %column.column_type,
                    "Keeping existing column type"
                );
            }
            Some(_) => {}
            None => {
                columns.push(column.clone());
                new_columns.push(column.name.clone());
            }
        }
    }

    if !new_columns.is_empty() {
        info!(
            table = %existing.qualified_name(),
            columns = ?new_columns,
            "Adding columns to table"
        );
    }

    let mut parameters = existing.parameters.clone();
    parameters.extend(update.parameters.clone());
    let mut comments = existing.comments.clone();
    comments.extend(update.comments.clone());

    Ok(ReconciledState {
        schema: TableSchema::new(columns, existing.schema.partitions.clone()),
        parameters,
        comments,
        description: update
            .description
            .clone()
            .or_else(|| existing.description.clone()),
        new_columns,
        is_compatible,
    })
}

fn is_compatible(existing: &TableSchema, incoming: &TableSchema) -> bool {
    existing.partitions == incoming.partitions
        && incoming.columns.iter().all(|c| {
            existing
                .column_type(&c.name)
                .map_or(true, |current| *current == c.column_type)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FileFormat;
    use crate::schema::{ColumnType, SchemaColumn};

    fn existing() -> TableDefinition {
        let mut table = TableDefinition::new("db", "t", "s3://b/t/", FileFormat::Parquet)
            .with_schema(TableSchema::new(
                vec![
                    SchemaColumn::new("c0", ColumnType::BigInt),
                    SchemaColumn::new("c1", ColumnType::String),
                ],
                vec![SchemaColumn::new("y", ColumnType::Int)],
            ))
            .with_parameters(HashMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]))
            .with_description(Some("old".into()));
        table.comments.insert("c0".into(), "first".into());
        table
    }

    fn incoming() -> TableSchema {
        TableSchema::new(
            vec![
                SchemaColumn::new("c0", ColumnType::Double),
                SchemaColumn::new("c2", ColumnType::Boolean),
            ],
            vec![SchemaColumn::new("y", ColumnType::Int)],
        )
    }

    fn update() -> MetadataUpdate {
        MetadataUpdate {
            parameters: HashMap::from([("b".to_string(), "3".to_string())]),
            comments: HashMap::from([("c2".to_string(), "flag".to_string())]),
            description: None,
        }
    }

    #[test]
    fn test_new_table_takes_incoming() {
        let state = reconcile(None, &incoming(), WriteMode::Append, &update()).unwrap();
        assert_eq!(state.schema, incoming());
        assert_eq!(state.parameters.len(), 1);
        assert!(state.is_compatible);
    }

    #[test]
    fn test_overwrite_replaces_everything() {
        let table = existing();
        let state = reconcile(Some(&table), &incoming(), WriteMode::Overwrite, &update()).unwrap();
        assert_eq!(state.schema, incoming());
        assert!(!state.parameters.contains_key("a"));
        assert!(!state.comments.contains_key("c0"));
        assert_eq!(state.description, None);
        assert!(!state.is_compatible);
    }

    #[test]
    fn test_append_unions_and_keeps_existing_types() {
        let table = existing();
        for mode in [WriteMode::Append, WriteMode::OverwritePartitions] {
            let state = reconcile(Some(&table), &incoming(), mode, &update()).unwrap();
            let names: Vec<_> = state.schema.columns.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["c0", "c1", "c2"]);
            assert_eq!(state.schema.column_type("c0"), Some(&ColumnType::BigInt));
            assert_eq!(state.new_columns, vec!["c2"]);
            assert_eq!(state.parameters["a"], "1");
            assert_eq!(state.parameters["b"], "3");
            assert_eq!(state.comments.len(), 2);
            assert_eq!(state.description.as_deref(), Some("old"));
        }
    }

    #[test]
    fn test_append_with_conflicting_partitions() {
        let table = existing();
        let other = TableSchema::new(
            vec![SchemaColumn::new("c0", ColumnType::BigInt)],
            vec![SchemaColumn::new("m", ColumnType::Int)],
        );
        let err = reconcile(Some(&table), &other, WriteMode::Append, &update()).unwrap_err();
        assert!(err.is_validation());
    }
}

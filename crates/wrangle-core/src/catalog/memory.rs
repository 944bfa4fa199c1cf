//! In-memory catalog.
//!
//! Behaves like the Glue catalog for everything the library relies on: tables live
//! inside databases, archived updates bump the table version, partition upserts
//! are keyed by values, and partition expressions (`k = 'v' AND ...`) are
//! evaluated by the catalog.

use crate::catalog::{
    Catalog, DatabaseInfo, PartitionMap, TableDefinition, TableNameFilter, TableVersion,
};
use crate::error::CatalogError;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct DatabaseEntry {
    description: Option<String>,
    tables: BTreeMap<String, TableEntry>,
}

#[derive(Debug)]
struct TableEntry {
    definition: TableDefinition,
    /// Partition values -> location
    partitions: BTreeMap<Vec<String>, String>,
    archived: Vec<TableDefinition>,
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    databases: RwLock<BTreeMap<String, DatabaseEntry>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archived versions kept for a table.
    pub fn archived_versions(&self, database: &str, table: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.tables.get(table))
            .map(|t| t.archived.len())
            .unwrap_or(0)
    }

    fn missing_database(name: &str) -> CatalogError {
        CatalogError::Service(format!("EntityNotFoundException: database {} not found", name))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        Ok(self
            .databases
            .read()
            .iter()
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                description: db.description.clone(),
            })
            .collect())
    }

    async fn create_database(
        &self,
        name: &str,
        description: Option<&str>,
        exist_ok: bool,
    ) -> Result<()> {
        let mut databases = self.databases.write();
        if databases.contains_key(name) {
            if exist_ok {
                return Ok(());
            }
            return Err(CatalogError::AlreadyExists(format!("database {}", name)).into());
        }
        databases.insert(
            name.to_string(),
            DatabaseEntry {
                description: description.map(str::to_string),
                tables: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        self.databases
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::missing_database(name).into())
    }

    async fn get_tables(
        &self,
        database: Option<&str>,
        filter: &TableNameFilter,
    ) -> Result<Vec<TableDefinition>> {
        let databases = self.databases.read();
        if let Some(name) = database {
            if !databases.contains_key(name) {
                return Err(Self::missing_database(name).into());
            }
        }
        Ok(databases
            .iter()
            .filter(|(name, _)| database.map_or(true, |d| d == name.as_str()))
            .flat_map(|(_, db)| db.tables.values())
            .filter(|t| filter.matches(&t.definition.name))
            .map(|t| t.definition.clone())
            .collect())
    }

    async fn search_tables(&self, text: &str) -> Result<Vec<TableDefinition>> {
        let needle = text.to_lowercase();
        let databases = self.databases.read();
        Ok(databases
            .values()
            .flat_map(|db| db.tables.values())
            .map(|t| &t.definition)
            .filter(|def| {
                def.name.to_lowercase().contains(&needle)
                    || def
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || def
                        .schema
                        .columns
                        .iter()
                        .any(|c| c.name.to_lowercase().contains(&needle))
                    || def
                        .parameters
                        .values()
                        .any(|v| v.to_lowercase().contains(&needle))
                    || def
                        .comments
                        .values()
                        .any(|v| v.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableDefinition>> {
        Ok(self
            .databases
            .read()
            .get(database)
            .and_then(|db| db.tables.get(table))
            .map(|t| t.definition.clone()))
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<TableVersion> {
        let mut databases = self.databases.write();
        let db = databases
            .get_mut(&table.database)
            .ok_or_else(|| Self::missing_database(&table.database))?;
        if db.tables.contains_key(&table.name) {
            return Err(CatalogError::AlreadyExists(table.qualified_name()).into());
        }

        let mut definition = table.clone();
        definition.version = TableVersion(1);
        db.tables.insert(
            table.name.clone(),
            TableEntry {
                definition,
                partitions: BTreeMap::new(),
                archived: Vec::new(),
            },
        );
        debug!(table = %table.qualified_name(), "Created in-memory table");
        Ok(TableVersion(1))
    }

    async fn update_table(&self, table: &TableDefinition, archive: bool) -> Result<TableVersion> {
        let mut databases = self.databases.write();
        let entry = databases
            .get_mut(&table.database)
            .and_then(|db| db.tables.get_mut(&table.name))
            .ok_or_else(|| CatalogError::InvalidTable(table.qualified_name()))?;

        let version = if archive {
            entry.archived.push(entry.definition.clone());
            entry.definition.version.next()
        } else {
            entry.definition.version
        };

        let mut definition = table.clone();
        definition.version = version;
        entry.definition = definition;
        Ok(version)
    }

    async fn delete_table(&self, database: &str, table: &str) -> Result<bool> {
        Ok(self
            .databases
            .write()
            .get_mut(database)
            .and_then(|db| db.tables.remove(table))
            .is_some())
    }

    async fn upsert_partitions(
        &self,
        table: &TableDefinition,
        partitions: &PartitionMap,
    ) -> Result<()> {
        let mut databases = self.databases.write();
        let entry = databases
            .get_mut(&table.database)
            .and_then(|db| db.tables.get_mut(&table.name))
            .ok_or_else(|| CatalogError::InvalidTable(table.qualified_name()))?;

        for (location, values) in partitions {
            entry.partitions.insert(values.clone(), location.clone());
        }
        Ok(())
    }

    async fn get_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
    ) -> Result<PartitionMap> {
        let databases = self.databases.read();
        let entry = databases
            .get(database)
            .and_then(|db| db.tables.get(table))
            .ok_or_else(|| CatalogError::InvalidTable(format!("{}.{}", database, table)))?;

        let keys = entry.definition.schema.partition_names();
        let predicates = match expression {
            Some(expr) => parse_expression(expr)?,
            None => Vec::new(),
        };

        let mut result = PartitionMap::new();
        for (values, location) in &entry.partitions {
            let matches = predicates.iter().all(|p| p.eval(&keys, values));
            if matches {
                result.insert(location.clone(), values.clone());
            }
        }
        Ok(result)
    }

    async fn delete_partitions(
        &self,
        database: &str,
        table: &str,
        values: &[Vec<String>],
    ) -> Result<()> {
        let mut databases = self.databases.write();
        let entry = databases
            .get_mut(database)
            .and_then(|db| db.tables.get_mut(table))
            .ok_or_else(|| CatalogError::InvalidTable(format!("{}.{}", database, table)))?;
        for v in values {
            entry.partitions.remove(v);
        }
        Ok(())
    }
}

/// One `key op value` comparison.
#[derive(Debug)]
struct Predicate {
    key: String,
    value: String,
    negated: bool,
}

impl Predicate {
    fn eval(&self, keys: &[String], values: &[String]) -> bool {
        let actual = keys
            .iter()
            .position(|k| k == &self.key)
            .and_then(|i| values.get(i));
        match actual {
            Some(v) => (v == &self.value) != self.negated,
            None => false,
        }
    }
}

/// Parse `k = 'v' AND k2 <> 3`.
fn parse_expression(expr: &str) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for clause in split_and(expr) {
        let clause = clause.trim();
        let (key, value, negated) = if let Some((k, v)) = clause.split_once("<>") {
            (k, v, true)
        } else if let Some((k, v)) = clause.split_once("!=") {
            (k, v, true)
        } else if let Some((k, v)) = clause.split_once('=') {
            (k, v, false)
        } else {
            return Err(CatalogError::InvalidExpression(expr.to_string()).into());
        };

        let key = key.trim().trim_matches('`').trim_matches('"');
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value);
        if key.is_empty()
            || value.is_empty()
            || key.contains(|c: char| c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(CatalogError::InvalidExpression(expr.to_string()).into());
        }
        predicates.push(Predicate {
            key: key.to_string(),
            value: value.to_string(),
            negated,
        });
    }
    Ok(predicates)
}

// Splits on AND outside single-quoted values.
fn split_and(expr: &str) -> Vec<&str> {
    const SEPARATOR: &[u8] = b" and ";
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_quote = !in_quote;
        } else if !in_quote
            && bytes.len() - i >= SEPARATOR.len()
            && bytes[i..i + SEPARATOR.len()].eq_ignore_ascii_case(SEPARATOR)
        {
            parts.push(&expr[start..i]);
            i += SEPARATOR.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

//! Catalog command implementations.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::collections::{BTreeMap, HashMap};
use wrangle_core::catalog::TableNameFilter;
use wrangle_core::{Config, Session};

/// `wrangle catalog` actions.
#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// List databases
    Databases,

    /// List tables
    Tables {
        /// Restrict to one database
        #[arg(short, long)]
        database: Option<String>,

        /// Name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Name suffix
        #[arg(long)]
        suffix: Option<String>,

        /// Name substring
        #[arg(long)]
        contains: Option<String>,
    },

    /// Show a table's location, columns and partition keys
    Describe {
        database: String,
        table: String,
    },

    /// Print table parameters as JSON
    Params {
        database: String,
        table: String,
    },

    /// Upsert table parameters (key=value pairs)
    SetParams {
        database: String,
        table: String,

        #[arg(required = true)]
        pairs: Vec<String>,

        /// Replace all parameters instead of merging
        #[arg(long)]
        overwrite: bool,

        /// Keep the previous definition as a catalog version
        #[arg(long)]
        catalog_versioning: bool,
    },

    /// List registered partitions
    Partitions {
        database: String,
        table: String,

        /// Catalog-side filter expression
        #[arg(long)]
        expression: Option<String>,
    },
}

/// Run a catalog action.
pub async fn run(config: Config, action: CatalogAction) -> Result<()> {
    let session = Session::from_config(&config).await?;
    let sync = session.synchronizer();

    match action {
        CatalogAction::Databases => {
            for db in sync.catalog().databases().await? {
                match db.description {
                    Some(description) => println!("{}\t{}", db.name, description),
                    None => println!("{}", db.name),
                }
            }
        }

        CatalogAction::Tables {
            database,
            prefix,
            suffix,
            contains,
        } => {
            let filter =
                TableNameFilter::new(prefix.as_deref(), suffix.as_deref(), contains.as_deref())?;
            let tables = sync
                .catalog()
                .get_tables(database.as_deref(), &filter)
                .await?;
            for table in &tables {
                println!(
                    "{}\t{}\t{}",
                    table.qualified_name(),
                    table.format,
                    table.location
                );
            }
            println!("\n{} table(s)", tables.len());
        }

        CatalogAction::Describe { database, table } => {
            let definition = sync
                .catalog()
                .get_table(&database, &table)
                .await?
                .ok_or_else(|| anyhow!("Table {}.{} does not exist", database, table))?;

            println!("Table: {}", definition.qualified_name());
            println!("  Location: {}", definition.location);
            println!("  Format: {}", definition.format);
            println!("  Version: {}", definition.version);
            if let Some(description) = &definition.description {
                println!("  Description: {}", description);
            }
            println!("\nColumns:");
            for column in &definition.schema.columns {
                let comment = definition
                    .comments
                    .get(&column.name)
                    .map(|c| format!("  -- {}", c))
                    .unwrap_or_default();
                println!("  {} {}{}", column.name, column.column_type, comment);
            }
            if !definition.schema.partitions.is_empty() {
                println!("\nPartition keys:");
                for column in &definition.schema.partitions {
                    println!("  {} {}", column.name, column.column_type);
                }
            }
        }

        CatalogAction::Params { database, table } => {
            let parameters = sync.get_table_parameters(&database, &table).await?;
            let sorted: BTreeMap<_, _> = parameters.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&sorted)?);
        }

        CatalogAction::SetParams {
            database,
            table,
            pairs,
            overwrite,
            catalog_versioning,
        } => {
            let parameters = parse_pairs(&pairs)?;
            let versioning = catalog_versioning || config.write.catalog_versioning;
            let updated = if overwrite {
                sync.overwrite_table_parameters(&database, &table, &parameters, versioning)
                    .await?
            } else {
                sync.upsert_table_parameters(&database, &table, &parameters, versioning)
                    .await?
            };
            let sorted: BTreeMap<_, _> = updated.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&sorted)?);
        }

        CatalogAction::Partitions {
            database,
            table,
            expression,
        } => {
            let partitions = sync
                .catalog()
                .get_partitions(&database, &table, expression.as_deref())
                .await?;
            for (location, values) in &partitions {
                println!("{}\t[{}]", location, values.join(", "));
            }
            println!("\n{} partition(s)", partitions.len());
        }
    }

    Ok(())
}

fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow!("Expected key=value, got '{}'", pair))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let parsed = parse_pairs(&["a=1".into(), "b = two".into()]).unwrap();
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("two"));
        assert!(parse_pairs(&["novalue".into()]).is_err());
    }
}

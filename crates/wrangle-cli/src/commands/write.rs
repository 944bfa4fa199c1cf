//! Write command implementation.

use anyhow::{bail, Context, Result};
use arrow::compute::concat_batches;
use bytes::Bytes;
use clap::Args;
use std::path::PathBuf;
use tracing::info;
use wrangle_core::codec::{decode_csv, CsvOptions, FileFormat};
use wrangle_core::dataset::{WriteMode, WriteOptions};
use wrangle_core::{Config, Session};

/// Arguments of `wrangle write`.
#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Local CSV file with a header row
    pub input: PathBuf,

    /// Target object (single file) or prefix (dataset)
    #[arg(long)]
    pub path: String,

    /// Write a single object instead of a dataset
    #[arg(long)]
    pub single_file: bool,

    /// overwrite, append or overwrite_partitions
    #[arg(long, default_value = "append")]
    pub mode: WriteMode,

    /// Partition columns, comma separated
    #[arg(long, value_delimiter = ',')]
    pub partition_cols: Vec<String>,

    /// Catalog database
    #[arg(long)]
    pub database: Option<String>,

    /// Catalog table
    #[arg(long)]
    pub table: Option<String>,

    /// parquet or csv
    #[arg(long, default_value = "parquet")]
    pub format: FileFormat,

    /// Compression codec
    #[arg(long)]
    pub compression: Option<String>,

    /// Keep the previous table definition as a catalog version
    #[arg(long)]
    pub catalog_versioning: bool,
}

/// Write a local CSV file.
pub async fn run(config: Config, args: WriteArgs) -> Result<()> {
    let raw = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let (schema, batches) = decode_csv(Bytes::from(raw), &CsvOptions::default())?;
    if batches.is_empty() {
        bail!("Input file {} has no rows", args.input.display());
    }
    let batch = concat_batches(&schema, &batches)?;

    let mut builder = WriteOptions::builder(&args.path)
        .format(args.format)
        .dataset(!args.single_file)
        .partition_cols(args.partition_cols.iter())
        .sanitize_columns(config.write.sanitize_columns)
        .catalog_versioning(args.catalog_versioning || config.write.catalog_versioning);
    if !args.single_file {
        builder = builder.mode(args.mode);
    }
    if let Some(database) = &args.database {
        builder = builder.database(database);
    }
    if let Some(table) = &args.table {
        builder = builder.table(table);
    }
    if let Some(compression) = args.compression.as_ref().or(config.write.compression.as_ref()) {
        builder = builder.compression(compression);
    }
    let options = builder.build()?;

    info!(
        input = %args.input.display(),
        path = %options.path,
        rows = batch.num_rows(),
        "Writing data"
    );

    let session = Session::from_config(&config).await?;
    let result = session.writer().write(&batch, &options).await?;

    println!("Wrote {} object(s):", result.paths.len());
    for path in &result.paths {
        println!("  - {}", path);
    }
    if !result.partitions_values.is_empty() {
        println!("\nPartitions:");
        for (location, values) in &result.partitions_values {
            println!("  {} -> [{}]", location, values.join(", "));
        }
    }

    Ok(())
}

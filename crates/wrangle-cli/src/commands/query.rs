//! Query command implementation.

use anyhow::Result;
use arrow::util::pretty::pretty_format_batches;
use clap::Args;
use tracing::info;
use wrangle_core::athena::{QueryOptions, QueryOutput};
use wrangle_core::{Config, Session};

/// Arguments of `wrangle query`.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// SQL to run
    pub sql: String,

    /// Database context
    #[arg(short, long)]
    pub database: Option<String>,

    /// Materialize through a temporary CTAS table (true/false)
    #[arg(long)]
    pub ctas_approach: Option<bool>,

    /// Print results in chunks of this many rows
    #[arg(long)]
    pub chunksize: Option<usize>,

    /// Reuse an execution that finished within this many seconds
    #[arg(long)]
    pub max_cache_seconds: Option<u64>,

    /// Workgroup
    #[arg(long)]
    pub workgroup: Option<String>,

    /// Result location
    #[arg(long)]
    pub s3_output: Option<String>,

    /// Keep CTAS result files (true/false)
    #[arg(long)]
    pub keep_files: Option<bool>,
}

impl QueryArgs {
    fn options(&self) -> QueryOptions {
        QueryOptions {
            database: self.database.clone(),
            ctas_approach: self.ctas_approach,
            chunksize: self.chunksize,
            s3_output: self.s3_output.clone(),
            workgroup: self.workgroup.clone(),
            keep_files: self.keep_files,
            max_cache_seconds: self.max_cache_seconds,
            ..QueryOptions::default()
        }
    }
}

/// Run a query and print its rows.
pub async fn run(config: Config, args: QueryArgs) -> Result<()> {
    info!(database = ?args.database, "Running query");

    let session = Session::from_config(&config).await?;
    let output = session
        .executor()
        .read_sql_query(&args.sql, &args.options())
        .await?;

    match output {
        QueryOutput::Table(batch) => {
            println!("{}", pretty_format_batches(&[batch.clone()])?);
            println!("{} rows", batch.num_rows());
        }
        QueryOutput::Chunks(mut chunks) => {
            let mut total = 0;
            let mut index = 0;
            while let Some(batch) = chunks.next_chunk().await? {
                index += 1;
                total += batch.num_rows();
                println!("--- chunk {} ({} rows) ---", index, batch.num_rows());
                println!("{}", pretty_format_batches(&[batch])?);
            }
            chunks.close().await?;
            println!("{} rows in {} chunks", total, index);
        }
    }

    Ok(())
}

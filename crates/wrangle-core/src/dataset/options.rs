//! Write options.
//!
//! [`WriteOptions`] is built through [`WriteOptionsBuilder`], which rejects invalid
//! argument combinations before anything touches storage or the catalog.

use crate::catalog::PartitionMap;
use crate::codec::{Compression, CsvOptions, EncodeOptions, FileFormat};
use crate::storage::{ensure_trailing_slash, S3Path};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Dataset write mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace all table state
    Overwrite,
    /// Add files and partitions, keep everything that exists (default)
    #[default]
    Append,
    /// Replace only the partitions present in the write
    OverwritePartitions,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            "overwrite_partitions" => Ok(WriteMode::OverwritePartitions),
            other => Err(Error::invalid_value(format!(
                "'{}' is not a valid mode (overwrite, append, overwrite_partitions)",
                other
            ))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Overwrite => write!(f, "overwrite"),
            WriteMode::Append => write!(f, "append"),
            WriteMode::OverwritePartitions => write!(f, "overwrite_partitions"),
        }
    }
}

/// Validated options of one write call.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Object key (single file) or dataset prefix ending in `/`
    pub path: String,
    /// Sink format
    pub format: FileFormat,
    /// Whether the path is a managed dataset prefix
    pub dataset: bool,
    /// Write mode (datasets only)
    pub mode: WriteMode,
    /// Partition columns in path order
    pub partition_cols: Vec<String>,
    /// Catalog database
    pub database: Option<String>,
    /// Catalog table
    pub table: Option<String>,
    /// Per-column type overrides
    pub dtype: HashMap<String, String>,
    /// Table description
    pub description: Option<String>,
    /// Table parameters to upsert
    pub parameters: HashMap<String, String>,
    /// Column comments to upsert
    pub columns_comments: HashMap<String, String>,
    /// Resolved codec
    pub compression: Compression,
    /// Archive previous definitions on redefinition
    pub catalog_versioning: bool,
    /// Sanitize column names on non-catalog writes
    pub sanitize_columns: bool,
    /// CSV layout
    pub csv: CsvOptions,
    /// Concurrent file writes (session default when unset)
    pub concurrency: Option<usize>,
}

impl WriteOptions {
    /// Start building options for `path`.
    pub fn builder(path: impl Into<String>) -> WriteOptionsBuilder {
        WriteOptionsBuilder::new(path)
    }

    /// `(database, table)` when the write is registered in the catalog.
    pub fn catalog_target(&self) -> Option<(&str, &str)> {
        match (&self.database, &self.table) {
            (Some(db), Some(table)) => Some((db.as_str(), table.as_str())),
            _ => None,
        }
    }

    /// Encoding options for each file.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            format: self.format,
            compression: self.compression,
            csv: self.csv.clone(),
        }
    }
}

/// Builder for [`WriteOptions`].
#[derive(Debug, Clone)]
pub struct WriteOptionsBuilder {
    path: String,
    format: FileFormat,
    dataset: bool,
    mode: Option<WriteMode>,
    partition_cols: Vec<String>,
    database: Option<String>,
    table: Option<String>,
    dtype: HashMap<String, String>,
    description: Option<String>,
    parameters: HashMap<String, String>,
    columns_comments: HashMap<String, String>,
    compression: Option<String>,
    catalog_versioning: bool,
    sanitize_columns: bool,
    csv: CsvOptions,
    concurrency: Option<usize>,
}

impl WriteOptionsBuilder {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: FileFormat::default(),
            dataset: false,
            mode: None,
            partition_cols: Vec::new(),
            database: None,
            table: None,
            dtype: HashMap::new(),
            description: None,
            parameters: HashMap::new(),
            columns_comments: HashMap::new(),
            compression: None,
            catalog_versioning: false,
            sanitize_columns: false,
            csv: CsvOptions::default(),
            concurrency: None,
        }
    }

    /// Sink format.
    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// Treat the path as a dataset prefix.
    pub fn dataset(mut self, dataset: bool) -> Self {
        self.dataset = dataset;
        self
    }

    /// Write mode.
    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Partition columns in path order.
    pub fn partition_cols<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_cols = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Catalog database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Catalog table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Per-column type overrides.
    pub fn dtype(mut self, dtype: HashMap<String, String>) -> Self {
        self.dtype = dtype;
        self
    }

    /// Table description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Table parameters.
    pub fn parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Column comments.
    pub fn columns_comments(mut self, comments: HashMap<String, String>) -> Self {
        self.columns_comments = comments;
        self
    }

    /// Codec name.
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Archive previous table definitions.
    pub fn catalog_versioning(mut self, enabled: bool) -> Self {
        self.catalog_versioning = enabled;
        self
    }

    /// Sanitize column names on non-catalog writes.
    pub fn sanitize_columns(mut self, enabled: bool) -> Self {
        self.sanitize_columns = enabled;
        self
    }

    /// CSV layout.
    pub fn csv(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }

    /// Concurrent file writes.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Validate and build the options.
    pub fn build(self) -> Result<WriteOptions> {
        S3Path::parse(&self.path)?;

        if self.database.is_some() != self.table.is_some() {
            return Err(Error::invalid_combination(
                "database and table must be passed together",
            ));
        }

        if !self.dataset {
            let mut offending = Vec::new();
            if self.mode.is_some() {
                offending.push("mode");
            }
            if !self.partition_cols.is_empty() {
                offending.push("partition_cols");
            }
            if self.database.is_some() {
                offending.push("database/table");
            }
            if self.description.is_some() {
                offending.push("description");
            }
            if !self.parameters.is_empty() {
                offending.push("parameters");
            }
            if !self.columns_comments.is_empty() {
                offending.push("columns_comments");
            }
            if !self.dtype.is_empty() {
                offending.push("dtype");
            }
            if !offending.is_empty() {
                return Err(Error::invalid_combination(format!(
                    "{} can only be used with dataset=true",
                    offending.join(", ")
                )));
            }
        }

        let mut seen = HashSet::new();
        for col in &self.partition_cols {
            if col.is_empty() {
                return Err(Error::invalid_combination("Partition column names cannot be empty"));
            }
            if !seen.insert(col.as_str()) {
                return Err(Error::invalid_combination(format!(
                    "Partition column '{}' is listed more than once",
                    col
                )));
            }
        }

        if self.concurrency == Some(0) {
            return Err(Error::invalid_value("concurrency must be at least 1"));
        }

        let compression = Compression::resolve(self.compression.as_deref(), self.format)?;

        let mut csv = self.csv;
        if self.table.is_some() {
            // Catalog CSV tables are read positionally without a header row.
            csv.header = false;
        }

        let path = if self.dataset {
            ensure_trailing_slash(&self.path)
        } else {
            self.path
        };

        Ok(WriteOptions {
            path,
            format: self.format,
            dataset: self.dataset,
            mode: self.mode.unwrap_or_default(),
            partition_cols: self.partition_cols,
            sanitize_columns: self.sanitize_columns || self.table.is_some(),
            database: self.database,
            table: self.table,
            dtype: self.dtype,
            description: self.description,
            parameters: self.parameters,
            columns_comments: self.columns_comments,
            compression,
            catalog_versioning: self.catalog_versioning,
            csv,
            concurrency: self.concurrency,
        })
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    /// Object locations written
    pub paths: Vec<String>,
    /// Partition location -> values touched by the write
    pub partitions_values: PartitionMap,
}

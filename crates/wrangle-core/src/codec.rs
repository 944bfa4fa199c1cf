//! Row codecs for the parquet and CSV sinks.
//!
//! Handles Arrow ↔ Parquet and Arrow ↔ CSV conversion with configurable compression.
//! CSV gzip goes through `flate2`; parquet codecs are handled by the parquet writer.

use crate::error::ValidationError;
use crate::{Error, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCodec;
use parquet::file::properties::WriterProperties;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;
use std::sync::Arc;

/// Sink file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileFormat {
    /// Apache Parquet (default)
    #[default]
    Parquet,
    /// Delimited text
    Csv,
}

impl FromStr for FileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parquet" => Ok(FileFormat::Parquet),
            "csv" => Ok(FileFormat::Csv),
            other => Err(Error::invalid_value(format!(
                "Unsupported file format '{}' (expected parquet or csv)",
                other
            ))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Parquet => write!(f, "parquet"),
            FileFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Snappy (parquet default)
    Snappy,
    /// Gzip
    Gzip,
    /// Zstd
    Zstd,
    /// LZ4
    Lz4,
    /// No compression
    None,
}

impl Compression {
    /// Resolve a codec name for a format. `None` selects the format default.
    pub fn resolve(name: Option<&str>, format: FileFormat) -> Result<Self> {
        let Some(name) = name else {
            return Ok(match format {
                FileFormat::Parquet => Compression::Snappy,
                FileFormat::Csv => Compression::None,
            });
        };

        let codec = match name.to_lowercase().as_str() {
            "snappy" => Compression::Snappy,
            "gzip" | "gz" => Compression::Gzip,
            "zstd" => Compression::Zstd,
            "lz4" => Compression::Lz4,
            "none" | "uncompressed" => Compression::None,
            _ => {
                return Err(ValidationError::InvalidCompression(format!(
                    "'{}' is not a supported compression",
                    name
                ))
                .into())
            }
        };

        if format == FileFormat::Csv && !matches!(codec, Compression::Gzip | Compression::None) {
            return Err(ValidationError::InvalidCompression(format!(
                "'{}' is not supported for CSV (use gzip or none)",
                name
            ))
            .into());
        }
        Ok(codec)
    }

    /// Value stored in the catalog `compressionType` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Snappy => "snappy",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::Lz4 => "lz4",
            Compression::None => "none",
        }
    }

    /// Object key suffix for files written with this codec.
    pub fn file_extension(&self, format: FileFormat) -> &'static str {
        match (format, self) {
            (FileFormat::Parquet, Compression::Snappy) => ".snappy.parquet",
            (FileFormat::Parquet, Compression::Gzip) => ".gz.parquet",
            (FileFormat::Parquet, Compression::Zstd) => ".zstd.parquet",
            (FileFormat::Parquet, Compression::Lz4) => ".lz4.parquet",
            (FileFormat::Parquet, Compression::None) => ".parquet",
            (FileFormat::Csv, Compression::Gzip) => ".csv.gz",
            (FileFormat::Csv, _) => ".csv",
        }
    }

    fn parquet_codec(&self) -> ParquetCodec {
        match self {
            Compression::Snappy => ParquetCodec::SNAPPY,
            Compression::Gzip => ParquetCodec::GZIP(Default::default()),
            Compression::Zstd => ParquetCodec::ZSTD(Default::default()),
            Compression::Lz4 => ParquetCodec::LZ4,
            Compression::None => ParquetCodec::UNCOMPRESSED,
        }
    }
}

/// CSV layout options.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field delimiter
    pub delimiter: u8,
    /// Whether the first line is a header
    pub header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
        }
    }
}

/// Encode options for one file.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Sink format
    pub format: FileFormat,
    /// Codec
    pub compression: Compression,
    /// CSV layout (ignored for parquet)
    pub csv: CsvOptions,
}

/// Encode a batch according to `options`.
pub fn encode(batch: &RecordBatch, options: &EncodeOptions) -> Result<Bytes> {
    match options.format {
        FileFormat::Parquet => encode_parquet(batch, options.compression),
        FileFormat::Csv => encode_csv(batch, &options.csv, options.compression),
    }
}

/// Encode one dataset file as Parquet with the given codec.
pub fn encode_parquet(batch: &RecordBatch, compression: Compression) -> Result<Bytes> {
    let mut buffer = Cursor::new(Vec::new());

    let props = WriterProperties::builder()
        .set_compression(compression.parquet_codec())
        .set_max_row_group_size(128 * 1024)
        .set_write_batch_size(1024)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .map_err(|e| Error::Codec(format!("Failed to create Parquet writer: {}", e)))?;

    writer
        .write(batch)
        .map_err(|e| Error::Codec(format!("Failed to write batch to Parquet: {}", e)))?;

    writer
        .close()
        .map_err(|e| Error::Codec(format!("Failed to close Parquet writer: {}", e)))?;

    Ok(Bytes::from(buffer.into_inner()))
}

/// Encode one dataset file as delimited text, gzipped when the codec asks for it.
pub fn encode_csv(
    batch: &RecordBatch,
    options: &CsvOptions,
    compression: Compression,
) -> Result<Bytes> {
    if let Some(field) = batch
        .schema()
        .fields()
        .iter()
        .find(|f| f.data_type().is_nested())
    {
        return Err(Error::unsupported_type(format!(
            "Column '{}' of type {:?} cannot be written as CSV",
            field.name(),
            field.data_type()
        )));
    }

    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(options.header)
        .with_delimiter(options.delimiter)
        .build(Vec::new());
    writer
        .write(batch)
        .map_err(|e| Error::Codec(format!("Failed to write batch to CSV: {}", e)))?;
    let text = writer.into_inner();

    match compression {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&text)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        _ => Ok(Bytes::from(text)),
    }
}

/// Decode parquet bytes into its schema and record batches.
pub fn decode_parquet(data: Bytes) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| Error::Codec(format!("Failed to open Parquet data: {}", e)))?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((schema, batches))
}

/// Decode delimited text (gzip detected by magic bytes), inferring the schema.
pub fn decode_csv(data: Bytes, options: &CsvOptions) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let raw = if data.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(data.as_ref()).read_to_end(&mut out)?;
        out
    } else {
        data.to_vec()
    };

    let format = arrow::csv::reader::Format::default()
        .with_header(options.header)
        .with_delimiter(options.delimiter);
    let (schema, _) = format.infer_schema(Cursor::new(&raw), Some(1000))?;
    let schema = Arc::new(schema);

    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(Cursor::new(raw))?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((schema, batches))
}

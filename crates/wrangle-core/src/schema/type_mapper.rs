//! Arrow to catalog type mapping.
//!
//! Unsigned integers are promoted to the next wider signed type that holds their full
//! range (`u8 -> smallint`, `u16 -> int`, `u32 -> bigint`); `u64` has no safe catalog
//! representation. Composite types are only accepted for parquet sinks.

use crate::codec::FileFormat;
use crate::error::ValidationError;
use crate::schema::{ColumnType, SchemaColumn, TableSchema};
use crate::{Error, Result};
use arrow::datatypes::{DataType, Schema};
use std::collections::HashMap;

/// Maps Arrow schemas to catalog schemas for one sink format.
#[derive(Debug, Clone, Copy)]
pub struct TypeMapper {
    format: FileFormat,
}

impl TypeMapper {
    /// Create a mapper for the given sink format.
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Map one Arrow type to a catalog type.
    pub fn map_type(&self, column: &str, data_type: &DataType) -> Result<ColumnType> {
        let mapped = match data_type {
            DataType::Null => {
                return Err(ValidationError::UndetectedType(format!(
                    "Impossible to infer the type of column '{}' (all values are null). \
                     Declare an explicit type for it",
                    column
                ))
                .into())
            }
            DataType::Boolean => ColumnType::Boolean,
            DataType::Int8 => ColumnType::TinyInt,
            DataType::Int16 | DataType::UInt8 => ColumnType::SmallInt,
            DataType::Int32 | DataType::UInt16 => ColumnType::Int,
            DataType::Int64 | DataType::UInt32 => ColumnType::BigInt,
            DataType::UInt64 => {
                return Err(Error::unsupported_type(format!(
                    "Column '{}' is an unsigned 64-bit integer, which has no catalog representation",
                    column
                )))
            }
            DataType::Float16 | DataType::Float32 => ColumnType::Float,
            DataType::Float64 => ColumnType::Double,
            DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
                if *scale < 0 || *precision > 38 {
                    return Err(Error::unsupported_type(format!(
                        "Column '{}' has decimal({},{}) which the catalog cannot hold",
                        column, precision, scale
                    )));
                }
                ColumnType::Decimal {
                    precision: *precision,
                    scale: *scale as u8,
                }
            }
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ColumnType::String,
            DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::FixedSizeBinary(_) => ColumnType::Binary,
            DataType::Date32 | DataType::Date64 => ColumnType::Date,
            DataType::Timestamp(_, _) => ColumnType::Timestamp,
            DataType::Dictionary(_, value) => return self.map_type(column, value),
            DataType::List(field)
            | DataType::LargeList(field)
            | DataType::FixedSizeList(field, _) => {
                ColumnType::Array(Box::new(self.map_nested(column, field.data_type())?))
            }
            DataType::Struct(fields) => {
                let mut mapped = Vec::with_capacity(fields.len());
                for field in fields {
                    mapped.push((
                        field.name().clone(),
                        self.map_nested(column, field.data_type())?,
                    ));
                }
                ColumnType::Struct(mapped)
            }
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => ColumnType::Map(
                    Box::new(self.map_nested(column, kv[0].data_type())?),
                    Box::new(self.map_nested(column, kv[1].data_type())?),
                ),
                other => {
                    return Err(Error::unsupported_type(format!(
                        "Column '{}' has malformed map entries {:?}",
                        column, other
                    )))
                }
            },
            other => {
                return Err(Error::unsupported_type(format!(
                    "Column '{}' has unsupported type {:?}",
                    column, other
                )))
            }
        };

        self.check_sink(column, mapped)
    }

    // Nested null children fall back to string, like an empty list column.
    fn map_nested(&self, column: &str, data_type: &DataType) -> Result<ColumnType> {
        match data_type {
            DataType::Null => Ok(ColumnType::String),
            other => self.map_type(column, other),
        }
    }

    fn check_sink(&self, column: &str, mapped: ColumnType) -> Result<ColumnType> {
        if mapped.is_composite() && self.format == FileFormat::Csv {
            return Err(Error::unsupported_type(format!(
                "Column '{}' of type {} cannot be written as CSV",
                column, mapped
            )));
        }
        Ok(mapped)
    }

    /// Map a whole Arrow schema into regular and partition columns.
    ///
    /// `overrides` (column -> type string) take precedence over inference and are
    /// validated syntactically only. Partition columns follow `partition_cols` order.
    pub fn map_schema(
        &self,
        schema: &Schema,
        partition_cols: &[String],
        overrides: &HashMap<String, String>,
    ) -> Result<TableSchema> {
        let mut columns = Vec::new();
        let mut partitions = Vec::new();

        for field in schema.fields() {
            if partition_cols.contains(field.name()) {
                continue;
            }
            columns.push(SchemaColumn::new(
                field.name(),
                self.resolve(field.name(), field.data_type(), overrides)?,
            ));
        }

        for name in partition_cols {
            let field = schema.field_with_name(name).map_err(|_| {
                Error::invalid_combination(format!(
                    "Partition column '{}' is not in the schema",
                    name
                ))
            })?;
            partitions.push(SchemaColumn::new(
                name,
                self.resolve(name, field.data_type(), overrides)?,
            ));
        }

        Ok(TableSchema::new(columns, partitions))
    }

    fn resolve(
        &self,
        column: &str,
        data_type: &DataType,
        overrides: &HashMap<String, String>,
    ) -> Result<ColumnType> {
        match overrides.get(column) {
            Some(declared) => {
                let parsed: ColumnType = declared.parse()?;
                self.check_sink(column, parsed)
            }
            None => self.map_type(column, data_type),
        }
    }
}

/// Column and partition types a write of `schema` would register.
///
/// `file_format` is `"parquet"` or `"csv"`; anything else is `InvalidArgumentValue`.
pub fn extract_athena_types(
    schema: &Schema,
    partition_cols: &[String],
    file_format: &str,
    dtype: &HashMap<String, String>,
) -> Result<(Vec<SchemaColumn>, Vec<SchemaColumn>)> {
    let format: FileFormat = file_format.parse()?;
    let table = TypeMapper::new(format).map_schema(schema, partition_cols, dtype)?;
    Ok((table.columns, table.partitions))
}

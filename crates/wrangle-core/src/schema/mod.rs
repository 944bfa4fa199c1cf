//! Catalog type system and table schemas.
//!
//! This module provides:
//! - [`ColumnType`]: the catalog's column types, parsed from and rendered to Hive/Athena DDL strings
//! - [`TableSchema`]: ordered regular and partition columns of a table
//! - Type mapping between Arrow and the catalog ([`type_mapper`])
//! - Table and column name sanitization ([`sanitize`])

pub mod sanitize;
pub mod type_mapper;

use crate::{Error, Result};
use arrow::datatypes::{DataType, Field, Fields, TimeUnit};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use sanitize::{sanitize_column_name, sanitize_table_name, SanitizedNames};
pub use type_mapper::{extract_athena_types, TypeMapper};

/// Catalog column types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 8-bit signed integer
    TinyInt,
    /// 16-bit signed integer
    SmallInt,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    BigInt,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Fixed-precision decimal
    Decimal { precision: u8, scale: u8 },
    /// Variable-length string
    String,
    /// Bounded variable-length string
    Varchar(u32),
    /// Fixed-length string
    Char(u32),
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Timestamp without time zone
    Timestamp,
    /// Binary data
    Binary,
    /// Array of one element type
    Array(Box<ColumnType>),
    /// Map from key type to value type
    Map(Box<ColumnType>, Box<ColumnType>),
    /// Struct of named fields
    Struct(Vec<(String, ColumnType)>),
}

impl ColumnType {
    /// Whether this is an array, map or struct.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            ColumnType::Array(_) | ColumnType::Map(_, _) | ColumnType::Struct(_)
        )
    }

    /// Arrow type used to materialize values of this catalog type.
    pub fn to_arrow(&self) -> DataType {
        match self {
            ColumnType::TinyInt => DataType::Int8,
            ColumnType::SmallInt => DataType::Int16,
            ColumnType::Int => DataType::Int32,
            ColumnType::BigInt => DataType::Int64,
            ColumnType::Float => DataType::Float32,
            ColumnType::Double => DataType::Float64,
            ColumnType::Decimal { precision, scale } => {
                DataType::Decimal128(*precision, *scale as i8)
            }
            ColumnType::String | ColumnType::Varchar(_) | ColumnType::Char(_) => DataType::Utf8,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Date => DataType::Date32,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, None),
            ColumnType::Binary => DataType::Binary,
            ColumnType::Array(inner) => {
                DataType::List(Arc::new(Field::new("item", inner.to_arrow(), true)))
            }
            ColumnType::Map(key, value) => {
                let entries = Field::new(
                    "entries",
                    DataType::Struct(Fields::from(vec![
                        Field::new("key", key.to_arrow(), false),
                        Field::new("value", value.to_arrow(), true),
                    ])),
                    false,
                );
                DataType::Map(Arc::new(entries), false)
            }
            ColumnType::Struct(fields) => DataType::Struct(Fields::from(
                fields
                    .iter()
                    .map(|(name, ty)| Field::new(name, ty.to_arrow(), true))
                    .collect::<Vec<_>>(),
            )),
        }
    }

    fn parse_inner(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        let lower = s.to_lowercase();

        if let Some(args) = strip_wrapper(&lower, "decimal", '(', ')') {
            let parts = split_top_level(args);
            if parts.len() != 2 {
                return Err(format!("decimal requires precision and scale: {}", s));
            }
            let precision: u8 = parts[0]
                .trim()
                .parse()
                .map_err(|_| format!("invalid decimal precision: {}", s))?;
            let scale: u8 = parts[1]
                .trim()
                .parse()
                .map_err(|_| format!("invalid decimal scale: {}", s))?;
            if precision == 0 || precision > 38 || scale > precision {
                return Err(format!("decimal precision/scale out of range: {}", s));
            }
            return Ok(ColumnType::Decimal { precision, scale });
        }
        if let Some(arg) = strip_wrapper(&lower, "char", '(', ')') {
            return parse_length(arg, s).map(ColumnType::Char);
        }
        if let Some(arg) = strip_wrapper(&lower, "varchar", '(', ')') {
            return parse_length(arg, s).map(ColumnType::Varchar);
        }
        if let Some(inner) = strip_wrapper(s, "array", '<', '>') {
            return Ok(ColumnType::Array(Box::new(Self::parse_inner(inner)?)));
        }
        if let Some(args) = strip_wrapper(s, "map", '<', '>') {
            let parts = split_top_level(args);
            if parts.len() != 2 {
                return Err(format!("map requires key and value types: {}", s));
            }
            return Ok(ColumnType::Map(
                Box::new(Self::parse_inner(parts[0])?),
                Box::new(Self::parse_inner(parts[1])?),
            ));
        }
        if let Some(args) = strip_wrapper(s, "struct", '<', '>') {
            let mut fields = Vec::new();
            for part in split_top_level(args) {
                let (name, ty) = part
                    .split_once(':')
                    .ok_or_else(|| format!("struct field requires name:type: {}", part))?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(format!("struct field without name: {}", s));
                }
                fields.push((name.to_string(), Self::parse_inner(ty)?));
            }
            if fields.is_empty() {
                return Err(format!("struct requires at least one field: {}", s));
            }
            return Ok(ColumnType::Struct(fields));
        }

        match lower.as_str() {
            "tinyint" => Ok(ColumnType::TinyInt),
            "smallint" => Ok(ColumnType::SmallInt),
            "int" | "integer" => Ok(ColumnType::Int),
            "bigint" => Ok(ColumnType::BigInt),
            "float" | "real" => Ok(ColumnType::Float),
            "double" => Ok(ColumnType::Double),
            "string" | "varchar" => Ok(ColumnType::String),
            "boolean" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "timestamp" => Ok(ColumnType::Timestamp),
            "binary" | "varbinary" => Ok(ColumnType::Binary),
            _ => Err(format!("unrecognized type: {}", s)),
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_inner(s).map_err(Error::invalid_value)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "tinyint"),
            ColumnType::SmallInt => write!(f, "smallint"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            ColumnType::String => write!(f, "string"),
            ColumnType::Varchar(n) => write!(f, "varchar({})", n),
            ColumnType::Char(n) => write!(f, "char({})", n),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Binary => write!(f, "binary"),
            ColumnType::Array(inner) => write!(f, "array<{}>", inner),
            ColumnType::Map(key, value) => write!(f, "map<{},{}>", key, value),
            ColumnType::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", name, ty)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// `name<...>` or `name(...)` -> inner text.
fn strip_wrapper<'a>(s: &'a str, name: &str, open: char, close: char) -> Option<&'a str> {
    let rest = s.get(..name.len())?;
    if !rest.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = s[name.len()..].trim_start();
    rest.strip_prefix(open)?.strip_suffix(close)
}

/// Split on commas that are not nested inside `<>` or `()`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !s[start..].trim().is_empty() {
        parts.push(&s[start..]);
    }
    parts
}

fn parse_length(arg: &str, original: &str) -> std::result::Result<u32, String> {
    match arg.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("invalid length: {}", original)),
    }
}

/// One named column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaColumn {
    /// Column name
    pub name: String,
    /// Catalog type
    pub column_type: ColumnType,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Regular and partition columns of a table.
///
/// Column order is kept for rendering table definitions; lookups are by name.
/// Partition columns are disjoint from regular columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    /// Regular columns
    pub columns: Vec<SchemaColumn>,
    /// Partition columns, in path order
    pub partitions: Vec<SchemaColumn>,
}

impl TableSchema {
    /// Create a schema from regular and partition columns.
    pub fn new(columns: Vec<SchemaColumn>, partitions: Vec<SchemaColumn>) -> Self {
        Self {
            columns,
            partitions,
        }
    }

    /// Type of a regular column.
    pub fn column_type(&self, name: &str) -> Option<&ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.column_type)
    }

    /// Type of a partition column.
    pub fn partition_type(&self, name: &str) -> Option<&ColumnType> {
        self.partitions
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.column_type)
    }

    /// Partition column names, in path order.
    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.iter().map(|c| c.name.clone()).collect()
    }

    /// Type of any column, regular or partition.
    pub fn lookup(&self, name: &str) -> Option<&ColumnType> {
        self.column_type(name).or_else(|| self.partition_type(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        assert_eq!("int".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("INTEGER".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("bigint".parse::<ColumnType>().unwrap(), ColumnType::BigInt);
        assert_eq!("varchar".parse::<ColumnType>().unwrap(), ColumnType::String);
        assert_eq!(
            "timestamp".parse::<ColumnType>().unwrap(),
            ColumnType::Timestamp
        );
    }

    #[test]
    fn test_parse_parameterized() {
        assert_eq!(
            "decimal(10,2)".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            "decimal( 38 , 0 )".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal {
                precision: 38,
                scale: 0
            }
        );
        assert_eq!("char(3)".parse::<ColumnType>().unwrap(), ColumnType::Char(3));
        assert_eq!(
            "varchar(255)".parse::<ColumnType>().unwrap(),
            ColumnType::Varchar(255)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["decimal(10)", "decimal(40,2)", "decimal(4,5)", "char(0)", "char(x)", "nope"] {
            let err = bad.parse::<ColumnType>().unwrap_err();
            assert!(err.is_validation(), "{} should fail validation", bad);
        }
    }

    #[test]
    fn test_composite_round_trip() {
        let ty: ColumnType = "struct<a:int,b:array<map<string,decimal(5,1)>>>".parse().unwrap();
        assert!(ty.is_composite());
        assert_eq!(
            ty.to_string(),
            "struct<a:int,b:array<map<string,decimal(5,1)>>>"
        );
    }

    #[test]
    fn test_to_arrow() {
        assert_eq!(ColumnType::SmallInt.to_arrow(), DataType::Int16);
        assert_eq!(ColumnType::Char(2).to_arrow(), DataType::Utf8);
        assert!(matches!(
            ColumnType::Array(Box::new(ColumnType::Int)).to_arrow(),
            DataType::List(_)
        ));
    }

    #[test]
    fn test_table_schema_lookup() {
        let schema = TableSchema::new(
            vec![SchemaColumn::new("c0", ColumnType::BigInt)],
            vec![SchemaColumn::new("y", ColumnType::Int)],
        );
        assert_eq!(schema.column_type("c0"), Some(&ColumnType::BigInt));
        assert_eq!(schema.column_type("y"), None);
        assert_eq!(schema.lookup("y"), Some(&ColumnType::Int));
        assert_eq!(schema.partition_names(), vec!["y".to_string()]);
    }
}

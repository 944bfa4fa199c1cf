//! Partition indexing.
//!
//! Splits a batch into one slice per distinct combination of partition values.
//! Values are rendered in the catalog's canonical string form (dates as
//! `YYYY-MM-DD`, timestamps as `YYYY-MM-DD HH:MM:SS`) so the same logical value
//! always lands in the same prefix, whatever its source type.

use crate::{Error, Result};
use arrow::array::{RecordBatch, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use std::collections::{HashMap, HashSet};

/// Value used for null partition values.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// Rows of one partition.
#[derive(Debug, Clone)]
pub struct PartitionSlice {
    /// Partition values in partition column order
    pub values: Vec<String>,
    /// Relative prefix (`y=2020/m=1/`), empty for unpartitioned data
    pub location: String,
    /// Rows without the partition columns
    pub batch: RecordBatch,
}

/// Relative prefix for a set of partition values.
pub fn partition_location(partition_cols: &[String], values: &[String]) -> String {
    partition_cols
        .iter()
        .zip(values)
        .map(|(col, value)| format!("{}={}/", col, value))
        .collect()
}

/// Split `batch` by `partition_cols`.
///
/// Slices come out in first-seen row order and keep row order within each slice.
/// Partition columns are removed from the slice batches. With no partition
/// columns the whole batch is returned as a single slice.
pub fn derive_partitions(
    batch: &RecordBatch,
    partition_cols: &[String],
) -> Result<Vec<PartitionSlice>> {
    let schema = batch.schema();

    let mut seen = HashSet::new();
    let mut key_indices = Vec::with_capacity(partition_cols.len());
    for col in partition_cols {
        if col.is_empty() || !seen.insert(col.as_str()) {
            return Err(Error::invalid_combination(format!(
                "Partition columns must be non-empty and unique: {:?}",
                partition_cols
            )));
        }
        let index = schema.index_of(col).map_err(|_| {
            Error::invalid_combination(format!("Partition column '{}' is not in the schema", col))
        })?;
        key_indices.push(index);
    }

    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !key_indices.contains(i))
        .collect();
    let data = batch.project(&data_indices)?;

    if partition_cols.is_empty() {
        return Ok(vec![PartitionSlice {
            values: Vec::new(),
            location: String::new(),
            batch: data,
        }]);
    }

    if data_indices.is_empty() {
        return Err(Error::invalid_combination(
            "Cannot partition by every column of the data",
        ));
    }

    let options = FormatOptions::new()
        .with_date_format(Some("%Y-%m-%d"))
        .with_timestamp_format(Some("%Y-%m-%d %H:%M:%S"))
        .with_timestamp_tz_format(Some("%Y-%m-%d %H:%M:%S"));
    let key_arrays: Vec<_> = key_indices.iter().map(|i| batch.column(*i)).collect();
    let formatters = key_arrays
        .iter()
        .map(|array| ArrayFormatter::try_new(array.as_ref(), &options))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut groups: Vec<(Vec<String>, Vec<u32>)> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    for row in 0..batch.num_rows() {
        let values: Vec<String> = key_arrays
            .iter()
            .zip(&formatters)
            .map(|(array, formatter)| {
                if array.is_null(row) {
                    NULL_PARTITION_VALUE.to_string()
                } else {
                    formatter.value(row).to_string()
                }
            })
            .collect();

        match index.get(&values) {
            Some(&group) => groups[group].1.push(row as u32),
            None => {
                index.insert(values.clone(), groups.len());
                groups.push((values, vec![row as u32]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(values, rows)| {
            let rows = UInt32Array::from(rows);
            Ok(PartitionSlice {
                location: partition_location(partition_cols, &values),
                batch: take_record_batch(&data, &rows)?,
                values,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use arrow::array::{ArrayRef, Date32Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("y", DataType::Int64, true),
            Field::new("m", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])) as ArrayRef,
                Arc::new(Int64Array::from(vec![Some(2020), Some(2021), Some(2020), None, Some(2021)])),
                Arc::new(StringArray::from(vec!["1", "1", "2", "1", "1"])),
            ],
        )
        .unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_column() {
        let slices = derive_partitions(&batch(), &cols(&["y"])).unwrap();
        let locations: Vec<_> = slices.iter().map(|s| s.location.as_str()).collect();
        assert_eq!(
            locations,
            vec!["y=2020/", "y=2021/", "y=__HIVE_DEFAULT_PARTITION__/"]
        );
        assert_eq!(slices[0].batch.num_rows(), 2);
        assert_eq!(slices[1].batch.num_rows(), 2);
        assert_eq!(slices[0].batch.num_columns(), 2);
        assert!(slices[0].batch.schema().index_of("y").is_err());
    }

    #[test]
    fn test_column_order_sets_path_order() {
        let ym = derive_partitions(&batch(), &cols(&["y", "m"])).unwrap();
        let my = derive_partitions(&batch(), &cols(&["m", "y"])).unwrap();
        assert_eq!(ym.len(), my.len());
        assert_eq!(ym[0].location, "y=2020/m=1/");
        assert_eq!(my[0].location, "m=1/y=2020/");
        assert_eq!(ym[0].values, vec!["2020", "1"]);
    }

    #[test]
    fn test_dates_are_canonical() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, false),
            Field::new("d", DataType::Date32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1])) as ArrayRef,
                Arc::new(Date32Array::from(vec![18262])),
            ],
        )
        .unwrap();
        let slices = derive_partitions(&batch, &cols(&["d"])).unwrap();
        assert_eq!(slices[0].location, "d=2020-01-01/");
    }

    #[test]
    fn test_invalid_partition_columns() {
        for bad in [cols(&["missing"]), cols(&["y", "y"]), cols(&[""])] {
            let err = derive_partitions(&batch(), &bad).unwrap_err();
            assert!(matches!(
                err,
                Error::Validation(ValidationError::InvalidArgumentCombination(_))
            ));
        }
    }

    #[test]
    fn test_no_partitions() {
        let slices = derive_partitions(&batch(), &[]).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].location, "");
        assert_eq!(slices[0].batch.num_rows(), 5);
    }
}

//! Hive-style partitioned Parquet datasets on top of [`ObjectStore`].

use std::collections::BTreeMap;
use std::io::Cursor;

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::config::normalize_location;
use crate::error::{PipelineError, Result};
use crate::object_store::ObjectStore;

pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";
pub const PARQUET_SUFFIX: &str = ".snappy.parquet";
const OVERWRITE_PART_NAME: &str = "part-00000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Remove everything under the location, then write deterministic part files.
    Overwrite,
    /// Add uniquely named part files next to the existing ones.
    Append,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionedWrite {
    pub location: String,
    pub rows: usize,
    pub files: Vec<String>,
}

impl PartitionedWrite {
    pub fn partitions(&self) -> usize {
        self.files.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    /// Partition directory relative to the dataset location, e.g. `year=2023/month=11`.
    pub partition: String,
    pub files: usize,
}

pub fn parquet_bytes(df: &mut DataFrame) -> PolarsResult<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Snappy)
            .with_statistics(StatisticsOptions::default())
            .finish(df)?;
    }
    Ok(buffer)
}

/// Splits `df` by `partition_columns` and writes one part file per partition.
///
/// Partition columns are encoded in the directory names and removed from the
/// file contents.
pub async fn write_partitioned(
    store: &ObjectStore,
    location: &str,
    df: &DataFrame,
    partition_columns: &[&str],
    mode: WriteMode,
) -> Result<PartitionedWrite> {
    let location = normalize_location(location);
    if location.is_empty() {
        return Err(PipelineError::Processing(
            "refusing to write a dataset to the store root".into(),
        ));
    }

    if mode == WriteMode::Overwrite {
        let removed = store.delete_prefix(&location).await?;
        tracing::debug!(location = %location, removed = removed.len(), "cleared dataset location");
    }

    let mut files = Vec::new();
    if df.height() > 0 {
        let parts = if partition_columns.is_empty() {
            vec![df.clone()]
        } else {
            df.partition_by_stable(partition_columns.iter().copied(), true)?
        };

        for part in parts {
            let directory = partition_directory(&part, partition_columns)?;
            let mut contents = part.drop_many(partition_columns.iter().copied());
            let name = match mode {
                WriteMode::Overwrite => OVERWRITE_PART_NAME.to_string(),
                WriteMode::Append => format!("part-{}", Uuid::new_v4().simple()),
            };
            let key = format!("{location}{directory}{name}{PARQUET_SUFFIX}");
            let bytes = parquet_bytes(&mut contents)?;
            store.put_object(&key, bytes).await?;
            files.push(key);
        }
    }

    tracing::info!(
        location = %store.uri(&location),
        rows = df.height(),
        files = files.len(),
        ?mode,
        "partitioned dataset written"
    );

    Ok(PartitionedWrite {
        location,
        rows: df.height(),
        files,
    })
}

fn partition_directory(part: &DataFrame, partition_columns: &[&str]) -> Result<String> {
    let mut directory = String::new();
    for name in partition_columns {
        let value = part.column(name)?.get(0)?;
        directory.push_str(&format!("{name}={}/", partition_value(&value)));
    }
    Ok(directory)
}

fn partition_value(value: &AnyValue<'_>) -> String {
    match value {
        AnyValue::Null => HIVE_DEFAULT_PARTITION.to_string(),
        AnyValue::String(text) => (*text).to_string(),
        AnyValue::StringOwned(text) => text.to_string(),
        other => other.to_string(),
    }
}

/// Reads every part file under `location` back into one frame.
///
/// Partition values are restored from the directory names as Int32 columns
/// appended after the data columns. Returns `None` when the dataset is empty.
pub async fn read_partitioned(store: &ObjectStore, location: &str) -> Result<Option<DataFrame>> {
    let location = normalize_location(location);
    let keys = store.list_prefix(&location).await?;

    let mut combined: Option<DataFrame> = None;
    for key in keys.iter().filter(|key| key.ends_with(".parquet")) {
        let bytes = store.get_object(key).await?;
        let mut df = ParquetReader::new(Cursor::new(bytes)).finish()?;
        let height = df.height();
        for (name, value) in hive_segments(&key[location.len()..]) {
            let parsed = if value == HIVE_DEFAULT_PARTITION {
                None
            } else {
                Some(value.parse::<i32>().map_err(|err| {
                    PipelineError::Processing(format!(
                        "partition value '{value}' in '{key}' is not an integer: {err}"
                    ))
                })?)
            };
            df.with_column(Column::new(name.into(), vec![parsed; height]))?;
        }

        combined = Some(match combined {
            None => df,
            Some(mut acc) => {
                let aligned = df.select(acc.get_column_names_owned())?;
                acc.vstack_mut(&aligned)?;
                acc
            }
        });
    }

    Ok(combined)
}

/// Lists partition directories under `location` with their part-file counts.
pub async fn list_partitions(store: &ObjectStore, location: &str) -> Result<Vec<PartitionSummary>> {
    let location = normalize_location(location);
    let keys = store.list_prefix(&location).await?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in &keys {
        let relative = &key[location.len()..];
        let partition = match relative.rfind('/') {
            Some(idx) => relative[..idx].to_string(),
            None => String::new(),
        };
        *counts.entry(partition).or_default() += 1;
    }

    Ok(counts
        .into_iter()
        .map(|(partition, files)| PartitionSummary { partition, files })
        .collect())
}

fn hive_segments(relative_key: &str) -> Vec<(&str, &str)> {
    relative_key
        .split('/')
        .filter_map(|segment| segment.split_once('='))
        .collect()
}

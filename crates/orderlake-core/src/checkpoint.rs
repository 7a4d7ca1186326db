use std::io::Cursor;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::config::{normalize_location, CheckpointPolicy};
use crate::error::Result;
use crate::object_store::ObjectStore;
use crate::partitioned::{parquet_bytes, PARQUET_SUFFIX};
use crate::source::OrderHeader;

pub const LAST_ORDER_ID: &str = "last_order_id";
pub const LAST_SYNCED_DATE: &str = "last_synced_date";
pub const ETL_RUN_TIME: &str = "etl_run_time";

pub const DEFAULT_LAST_ORDER_ID: i64 = 0;
pub const DEFAULT_LAST_SYNCED_DATE: &str = "1900-01-01";

/// Renders a creation time the way checkpoints store it: whole seconds as
/// `YYYY-MM-DD HH:MM:SS`, otherwise with exactly six fractional digits.
pub fn synced_date_text(value: NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

const CHECKPOINT_FILE: &str = "checkpoint";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint object '{key}' is unreadable: {message}")]
    Unreadable { key: String, message: String },
    #[error("checkpoint at '{location}' changed during the run (expected {expected}, found {found})")]
    Conflict {
        location: String,
        expected: String,
        found: String,
    },
}

/// Persisted incremental cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub last_order_id: i64,
    pub last_synced_date: String,
    pub etl_run_time: Option<String>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            last_order_id: DEFAULT_LAST_ORDER_ID,
            last_synced_date: DEFAULT_LAST_SYNCED_DATE.to_string(),
            etl_run_time: None,
        }
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "order_id={} synced={}", self.last_order_id, self.last_synced_date)
    }
}

impl Checkpoint {
    pub fn new(last_order_id: i64, last_synced_date: impl Into<String>, run_time: DateTime<Utc>) -> Self {
        Self {
            last_order_id,
            last_synced_date: last_synced_date.into(),
            etl_run_time: Some(run_time.to_rfc3339()),
        }
    }

    /// Maximum order id and creation time of an extracted header batch.
    ///
    /// Returns `None` for an empty batch.
    pub fn from_headers(headers: &[OrderHeader], run_time: DateTime<Utc>) -> Option<Self> {
        let last_order_id = headers.iter().map(|header| header.order_id).max()?;
        let last_created: NaiveDateTime = headers.iter().map(|header| header.created_at).max()?;
        Some(Self::new(last_order_id, synced_date_text(last_created), run_time))
    }

    /// Cursor equality, ignoring when the checkpoint was written.
    pub fn same_cursor(&self, other: &Checkpoint) -> bool {
        self.last_order_id == other.last_order_id && self.last_synced_date == other.last_synced_date
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        df!(
            LAST_ORDER_ID => &[self.last_order_id],
            LAST_SYNCED_DATE => &[self.last_synced_date.as_str()],
            ETL_RUN_TIME => &[self.etl_run_time.as_deref()],
        )
    }

    /// Folds every row into one cursor by taking the maximum of each column.
    pub fn from_dataframe(df: &DataFrame) -> PolarsResult<Option<Self>> {
        if df.height() == 0 {
            return Ok(None);
        }
        let ids = df.column(LAST_ORDER_ID)?.cast(&DataType::Int64)?;
        let dates = df.column(LAST_SYNCED_DATE)?.cast(&DataType::String)?;

        let Some(last_order_id) = ids.i64()?.max() else {
            return Ok(None);
        };
        let last_synced_date = dates
            .str()?
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(DEFAULT_LAST_SYNCED_DATE)
            .to_string();
        let etl_run_time = match df.column(ETL_RUN_TIME) {
            Ok(column) => column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .flatten()
                .max()
                .map(str::to_string),
            Err(_) => None,
        };

        Ok(Some(Self {
            last_order_id,
            last_synced_date,
            etl_run_time,
        }))
    }

    fn max(self, other: Checkpoint) -> Checkpoint {
        Checkpoint {
            last_order_id: self.last_order_id.max(other.last_order_id),
            last_synced_date: self.last_synced_date.max(other.last_synced_date),
            etl_run_time: self.etl_run_time.max(other.etl_run_time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Nothing stored yet; the default cursor is in effect.
    Missing,
    Stored,
    /// Stored objects could not be decoded and the policy allowed a reset.
    ResetAfterError,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub source: CheckpointSource,
    /// Objects the checkpoint was read from.
    pub keys: Vec<String>,
}

/// Reads the checkpoint stored under `location`.
///
/// Several files are folded together by taking the maxima across all rows.
pub async fn load_checkpoint(
    store: &ObjectStore,
    location: &str,
    policy: CheckpointPolicy,
) -> Result<LoadedCheckpoint> {
    let location = normalize_location(location);
    let keys: Vec<String> = store
        .list_prefix(&location)
        .await?
        .into_iter()
        .filter(|key| key.ends_with(".parquet"))
        .collect();

    if keys.is_empty() {
        tracing::info!(location = %location, "no checkpoint stored; starting from the default cursor");
        return Ok(LoadedCheckpoint {
            checkpoint: Checkpoint::default(),
            source: CheckpointSource::Missing,
            keys,
        });
    }

    match read_checkpoint_objects(store, &keys).await {
        Ok(checkpoint) => {
            tracing::info!(
                location = %location,
                last_order_id = checkpoint.last_order_id,
                last_synced_date = %checkpoint.last_synced_date,
                files = keys.len(),
                "checkpoint loaded"
            );
            Ok(LoadedCheckpoint {
                checkpoint,
                source: CheckpointSource::Stored,
                keys,
            })
        }
        Err(err) => match policy {
            CheckpointPolicy::Strict => Err(err.into()),
            CheckpointPolicy::ResetOnError => {
                tracing::warn!(
                    location = %location,
                    error = %err,
                    "checkpoint unreadable; falling back to the default cursor"
                );
                Ok(LoadedCheckpoint {
                    checkpoint: Checkpoint::default(),
                    source: CheckpointSource::ResetAfterError,
                    keys,
                })
            }
        },
    }
}

async fn read_checkpoint_objects(
    store: &ObjectStore,
    keys: &[String],
) -> std::result::Result<Checkpoint, CheckpointError> {
    let mut folded: Option<Checkpoint> = None;
    for key in keys {
        let unreadable = |message: String| CheckpointError::Unreadable {
            key: key.clone(),
            message,
        };
        let bytes = store
            .get_object(key)
            .await
            .map_err(|err| unreadable(err.to_string()))?;
        let df = ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|err| unreadable(err.to_string()))?;
        let checkpoint = Checkpoint::from_dataframe(&df)
            .map_err(|err| unreadable(err.to_string()))?
            .ok_or_else(|| unreadable("no checkpoint rows".to_string()))?;
        folded = Some(match folded {
            None => checkpoint,
            Some(current) => current.max(checkpoint),
        });
    }
    folded.ok_or_else(|| CheckpointError::Unreadable {
        key: String::new(),
        message: "no checkpoint objects".to_string(),
    })
}

/// Replaces whatever is stored under `location` with a single checkpoint file.
pub async fn write_checkpoint(
    store: &ObjectStore,
    location: &str,
    checkpoint: &Checkpoint,
) -> Result<String> {
    let location = normalize_location(location);
    let key = format!("{location}{CHECKPOINT_FILE}{PARQUET_SUFFIX}");
    let bytes = parquet_bytes(&mut checkpoint.to_dataframe()?)?;
    store.put_object(&key, bytes).await?;

    for stale in store.list_prefix(&location).await? {
        if stale != key {
            store.delete(&stale).await?;
        }
    }

    tracing::info!(
        location = %location,
        last_order_id = checkpoint.last_order_id,
        last_synced_date = %checkpoint.last_synced_date,
        "checkpoint written"
    );
    Ok(key)
}

/// Writes `next` only if the stored cursor still equals `expected`.
pub async fn store_checkpoint(
    store: &ObjectStore,
    location: &str,
    policy: CheckpointPolicy,
    expected: &Checkpoint,
    next: &Checkpoint,
) -> Result<String> {
    let current = load_checkpoint(store, location, policy).await?;
    if !current.checkpoint.same_cursor(expected) {
        return Err(CheckpointError::Conflict {
            location: normalize_location(location),
            expected: expected.to_string(),
            found: current.checkpoint.to_string(),
        }
        .into());
    }
    write_checkpoint(store, location, next).await
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::PipelineError;

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 16, 2, 0, 0).unwrap()
    }

    fn header(order_id: i64, created: &str) -> OrderHeader {
        OrderHeader {
            order_id,
            created_at: NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S").unwrap(),
            ..OrderHeader::default()
        }
    }

    #[test]
    fn advances_to_batch_maxima() {
        let headers = vec![
            header(7, "2024-01-15 10:30:00"),
            header(12, "2024-01-14 09:00:00"),
            header(9, "2024-01-15 23:59:59"),
        ];
        let checkpoint = Checkpoint::from_headers(&headers, run_time()).unwrap();
        assert_eq!(checkpoint.last_order_id, 12);
        assert_eq!(checkpoint.last_synced_date, "2024-01-15 23:59:59");
        assert!(Checkpoint::from_headers(&[], run_time()).is_none());
    }

    #[test]
    fn fractional_seconds_keep_six_digits() {
        let at = |text: &str| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(
            synced_date_text(at("2024-01-15 10:30:00.5")),
            "2024-01-15 10:30:00.500000"
        );
        assert_eq!(
            synced_date_text(at("2024-01-15 10:30:00.123456789")),
            "2024-01-15 10:30:00.123456"
        );
        assert_eq!(synced_date_text(at("2024-01-15 10:30:00")), "2024-01-15 10:30:00");

        let headers = vec![OrderHeader {
            order_id: 4,
            created_at: at("2024-01-15 10:30:00.25"),
            ..OrderHeader::default()
        }];
        let checkpoint = Checkpoint::from_headers(&headers, run_time()).unwrap();
        assert_eq!(checkpoint.last_synced_date, "2024-01-15 10:30:00.250000");
    }

    #[tokio::test]
    async fn missing_checkpoint_uses_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::local(dir.path());
        let loaded = load_checkpoint(&store, "cp/", CheckpointPolicy::Strict).await?;
        assert_eq!(loaded.source, CheckpointSource::Missing);
        assert_eq!(loaded.checkpoint.last_order_id, 0);
        assert_eq!(loaded.checkpoint.last_synced_date, "1900-01-01");
        Ok(())
    }

    #[tokio::test]
    async fn folds_multiple_files_by_maximum() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::local(dir.path());
        let older = Checkpoint::new(5, "2024-01-10 00:00:00", run_time());
        let newer = Checkpoint::new(9, "2024-01-12 08:00:00", run_time());
        store
            .put_object("cp/part-a.snappy.parquet", parquet_bytes(&mut newer.to_dataframe()?)?)
            .await?;
        store
            .put_object("cp/part-b.snappy.parquet", parquet_bytes(&mut older.to_dataframe()?)?)
            .await?;

        let loaded = load_checkpoint(&store, "cp", CheckpointPolicy::Strict).await?;
        assert_eq!(loaded.source, CheckpointSource::Stored);
        assert_eq!(loaded.keys.len(), 2);
        assert!(loaded.checkpoint.same_cursor(&newer));

        // Writing collapses the location back to one file.
        write_checkpoint(&store, "cp", &newer).await?;
        assert_eq!(
            store.list_prefix("cp/").await?,
            vec!["cp/checkpoint.snappy.parquet".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_checkpoint_follows_policy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::local(dir.path());
        store
            .put_object("cp/checkpoint.snappy.parquet", b"not parquet".to_vec())
            .await?;

        let strict = load_checkpoint(&store, "cp", CheckpointPolicy::Strict).await;
        assert!(matches!(
            strict,
            Err(PipelineError::Checkpoint(CheckpointError::Unreadable { .. }))
        ));

        let lenient = load_checkpoint(&store, "cp", CheckpointPolicy::ResetOnError).await?;
        assert_eq!(lenient.source, CheckpointSource::ResetAfterError);
        assert_eq!(lenient.checkpoint, Checkpoint::default());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_advance_is_a_conflict() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::local(dir.path());
        let loaded = load_checkpoint(&store, "cp", CheckpointPolicy::Strict).await?;

        let other_writer = Checkpoint::new(40, "2024-01-15 10:00:00", run_time());
        write_checkpoint(&store, "cp", &other_writer).await?;

        let ours = Checkpoint::new(30, "2024-01-15 09:00:00", run_time());
        let result = store_checkpoint(
            &store,
            "cp",
            CheckpointPolicy::Strict,
            &loaded.checkpoint,
            &ours,
        )
        .await;
        assert!(matches!(
            result,
            Err(PipelineError::Checkpoint(CheckpointError::Conflict { .. }))
        ));

        let stored = load_checkpoint(&store, "cp", CheckpointPolicy::Strict).await?;
        assert!(stored.checkpoint.same_cursor(&other_writer));
        Ok(())
    }
}

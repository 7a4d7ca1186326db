//! Incremental sync from the transactional database into the partitioned order dataset.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use polars::prelude::*;
use serde::Serialize;

use crate::checkpoint::{load_checkpoint, store_checkpoint, Checkpoint, CheckpointSource};
use crate::config::{CaptureMode, PipelineConfig};
use crate::dimensions::derive_order_columns;
use crate::error::Result;
use crate::object_store::ObjectStore;
use crate::partitioned::{write_partitioned, WriteMode};
use crate::schema::*;
use crate::source::{ChangeFilter, OrderHeader, OrderItem, OrderSource};

/// Advisory lock key serializing sync runs against one database.
pub const SYNC_LOCK_KEY: i64 = 0x6f72_6465_726c_6b01;

fn datetime_us() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Extract and transform, but neither write rows nor advance the checkpoint.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NoNewOrders,
    DryRun,
    Synced,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub capture: CaptureMode,
    pub filter: ChangeFilter,
    pub previous_checkpoint: Checkpoint,
    pub checkpoint_source: CheckpointSource,
    pub new_checkpoint: Option<Checkpoint>,
    pub orders_extracted: usize,
    pub items_extracted: usize,
    pub orphaned_items: usize,
    pub rows_transformed: usize,
    pub rows_written: usize,
    pub files_written: Vec<String>,
}

fn micros(value: NaiveDateTime) -> i64 {
    value.and_utc().timestamp_micros()
}

fn datetime_column(name: &str, values: Vec<Option<i64>>) -> PolarsResult<Column> {
    Ok(Series::new(name.into(), values).cast(&datetime_us())?.into())
}

fn text_column(
    name: &str,
    headers: &[OrderHeader],
    field: fn(&OrderHeader) -> Option<&str>,
) -> Column {
    Column::new(name.into(), headers.iter().map(field).collect::<Vec<_>>())
}

/// Header columns needed downstream, with `user_id` already renamed to `customer_id`.
pub fn headers_frame(headers: &[OrderHeader]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(
            ORDER_ID.into(),
            headers.iter().map(|h| h.order_id).collect::<Vec<_>>(),
        ),
        text_column(CUSTOMER_ID, headers, |h| h.user_id.as_deref()),
        text_column(ORDER_NUMBER, headers, |h| h.order_number.as_deref()),
        text_column(STATUS, headers, |h| h.status.as_deref()),
        text_column(PAYMENT_STATUS, headers, |h| h.payment_status.as_deref()),
        text_column(SHIPPING_STATE, headers, |h| h.shipping_state.as_deref()),
        text_column(SHIPPING_CITY, headers, |h| h.shipping_city.as_deref()),
        text_column(SHIPPING_COUNTRY, headers, |h| h.shipping_country.as_deref()),
        text_column(SHIPPING_ADDRESS_LINE1, headers, |h| {
            h.shipping_address_line1.as_deref()
        }),
        text_column(SHIPPING_POSTAL_CODE, headers, |h| {
            h.shipping_postal_code.as_deref()
        }),
        Column::new(
            TOTAL_AMOUNT.into(),
            headers.iter().map(|h| h.total_amount).collect::<Vec<_>>(),
        ),
        datetime_column(
            ORDER_TIMESTAMP,
            headers.iter().map(|h| Some(micros(h.created_at))).collect(),
        )?,
    ])
}

pub fn items_frame(items: &[OrderItem]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(
            ORDER_ITEM_ID.into(),
            items.iter().map(|i| i.order_item_id).collect::<Vec<_>>(),
        ),
        Column::new(
            ORDER_ID.into(),
            items.iter().map(|i| i.order_id).collect::<Vec<_>>(),
        ),
        Column::new(
            ASIN.into(),
            items.iter().map(|i| i.asin.as_deref()).collect::<Vec<_>>(),
        ),
        Column::new(
            PRODUCT_TITLE.into(),
            items.iter().map(|i| i.title.as_deref()).collect::<Vec<_>>(),
        ),
        Column::new(
            UNIT_PRICE.into(),
            items.iter().map(|i| i.price).collect::<Vec<_>>(),
        ),
        Column::new(
            QUANTITY.into(),
            items.iter().map(|i| i.quantity).collect::<Vec<_>>(),
        ),
        Column::new(
            IMAGE_URL.into(),
            items.iter().map(|i| i.image_url.as_deref()).collect::<Vec<_>>(),
        ),
    ])
}

/// Joins headers to items and reshapes the result into the unified analytical row.
///
/// One output row per matched item, sorted by order id then item id.
pub fn unify_orders(
    headers: DataFrame,
    items: DataFrame,
    etl_timestamp: DateTime<Utc>,
) -> PolarsResult<DataFrame> {
    let joined = headers.lazy().join(
        items.lazy(),
        [col(ORDER_ID)],
        [col(ORDER_ID)],
        JoinArgs::new(JoinType::Inner),
    );

    let shaped = joined.select([
        col(ORDER_TIMESTAMP).cast(DataType::Date).alias(ORDER_DATE),
        col(UNIT_PRICE).cast(DataType::Float64),
        col(QUANTITY).cast(DataType::Int64),
        col(SHIPPING_STATE).fill_null(lit(UNKNOWN_STATE)),
        lit(CURRENT_ORDERS_CATEGORY).alias(CATEGORY),
        col(CUSTOMER_ID),
        col(ASIN),
        col(PRODUCT_TITLE),
        col(ORDER_TIMESTAMP),
        col(ORDER_ID),
        col(ORDER_ITEM_ID),
        col(ORDER_NUMBER),
        col(STATUS),
        col(PAYMENT_STATUS),
        col(SHIPPING_CITY).fill_null(lit(UNKNOWN_CITY)),
        col(SHIPPING_COUNTRY).fill_null(lit(DEFAULT_COUNTRY)),
        col(SHIPPING_ADDRESS_LINE1),
        col(SHIPPING_POSTAL_CODE),
        col(TOTAL_AMOUNT),
        col(IMAGE_URL),
        lit(etl_timestamp.timestamp_micros())
            .cast(datetime_us())
            .alias(ETL_TIMESTAMP),
        lit(OLTP_SYNC_SOURCE).alias(DATA_SOURCE),
    ]);

    derive_order_columns(shaped)
        .sort_by_exprs(
            [col(ORDER_ID), col(ORDER_ITEM_ID)],
            SortMultipleOptions::default(),
        )
        .collect()
}

fn count_orphans(headers: &[OrderHeader], items: &[OrderItem]) -> usize {
    let known: HashSet<i64> = headers.iter().map(|h| h.order_id).collect();
    items
        .iter()
        .filter(|item| !known.contains(&item.order_id))
        .count()
}

/// Runs one incremental sync against `source`, using `now` as both the
/// lookback anchor and the ETL timestamp.
pub async fn run_incremental(
    source: &dyn OrderSource,
    store: &ObjectStore,
    config: &PipelineConfig,
    options: SyncOptions,
    now: DateTime<Utc>,
) -> Result<SyncReport> {
    let policy = config.sync.checkpoint_policy;
    let loaded = load_checkpoint(store, &config.outputs.checkpoint, policy).await?;
    let filter = ChangeFilter::new(
        &loaded.checkpoint,
        now.date_naive(),
        config.sync.lookback_days,
        config.sync.capture,
    );

    let mut report = SyncReport {
        status: SyncStatus::NoNewOrders,
        capture: config.sync.capture,
        filter,
        previous_checkpoint: loaded.checkpoint.clone(),
        checkpoint_source: loaded.source,
        new_checkpoint: None,
        orders_extracted: 0,
        items_extracted: 0,
        orphaned_items: 0,
        rows_transformed: 0,
        rows_written: 0,
        files_written: Vec::new(),
    };

    let headers = source.fetch_orders(&filter).await?;
    report.orders_extracted = headers.len();
    tracing::info!(
        orders = headers.len(),
        last_order_id = filter.last_order_id,
        recent_since = ?filter.recent_since,
        "extracted order headers"
    );

    let Some(next_checkpoint) = Checkpoint::from_headers(&headers, now) else {
        tracing::info!("no new orders to process");
        return Ok(report);
    };

    let items = source.fetch_order_items(&filter).await?;
    report.items_extracted = items.len();
    report.orphaned_items = count_orphans(&headers, &items);
    tracing::info!(items = items.len(), "extracted order items");
    if report.orphaned_items > 0 {
        tracing::warn!(
            orphaned_items = report.orphaned_items,
            "order items without a header in this batch were dropped"
        );
    }

    let unified = unify_orders(headers_frame(&headers)?, items_frame(&items)?, now)?;
    report.rows_transformed = unified.height();
    report.new_checkpoint = Some(next_checkpoint.clone());
    tracing::info!(rows = unified.height(), "transformed orders to the unified layout");

    if options.dry_run {
        report.status = SyncStatus::DryRun;
        tracing::info!("dry run; nothing written");
        return Ok(report);
    }

    let written = write_partitioned(
        store,
        &config.outputs.incremental_orders,
        &unified,
        &INCREMENTAL_PARTITIONS,
        WriteMode::Append,
    )
    .await?;
    report.rows_written = written.rows;
    report.files_written = written.files;

    store_checkpoint(
        store,
        &config.outputs.checkpoint,
        policy,
        &loaded.checkpoint,
        &next_checkpoint,
    )
    .await?;
    tracing::info!(
        previous = %loaded.checkpoint,
        next = %next_checkpoint,
        "checkpoint advanced"
    );

    report.status = SyncStatus::Synced;
    Ok(report)
}

/// Runs a sync against Postgres while holding the sync advisory lock.
///
/// Fails with [`crate::error::PipelineError::SyncInProgress`] instead of
/// waiting when another sync holds it.
#[cfg(feature = "runtime")]
pub async fn execute_sync(
    pool: &crate::db::DbPool,
    store: &ObjectStore,
    config: &PipelineConfig,
    options: SyncOptions,
) -> Result<SyncReport> {
    use crate::lock::SyncLock;
    use crate::source::PgOrderSource;

    let lock = SyncLock::try_acquire(pool, SYNC_LOCK_KEY).await?;
    let source = PgOrderSource::new(pool.clone());
    let result = run_incremental(&source, store, config, options, Utc::now()).await;
    lock.release().await?;
    result
}

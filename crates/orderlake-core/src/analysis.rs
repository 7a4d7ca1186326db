//! Full-history aggregation of the bulk purchases export.

use polars::prelude::*;
use serde::Serialize;

use crate::aggregates::AggregateView;
use crate::config::PipelineConfig;
use crate::dimensions::derive_order_columns;
use crate::error::Result;
use crate::object_store::ObjectStore;
use crate::partitioned::{write_partitioned, WriteMode};
use crate::schema::IS_BLACK_FRIDAY_WEEK;

#[derive(Debug, Clone, Serialize)]
pub struct ViewReport {
    pub view: AggregateView,
    pub location: String,
    pub rows: usize,
    pub partitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub source: String,
    pub parser: &'static str,
    pub source_rows: usize,
    pub unparsed_dates: usize,
    pub black_friday_rows: usize,
    pub views: Vec<ViewReport>,
}

/// Parses a purchases export and applies the shared column derivation.
pub fn derive_orders(contents: &[u8]) -> Result<(orderlake_parser::RawOrders, DataFrame)> {
    let raw = orderlake_parser::parse_orders_file(contents)?;
    let derived = derive_order_columns(raw.df.clone().lazy()).collect()?;
    Ok((raw, derived))
}

/// Computes every aggregate view from the derived order frame.
pub fn compute_views(derived: &DataFrame) -> PolarsResult<Vec<(AggregateView, DataFrame)>> {
    AggregateView::ALL
        .into_iter()
        .map(|view| Ok((view, view.compute(derived.clone().lazy())?)))
        .collect()
}

fn count_black_friday_rows(derived: &DataFrame) -> PolarsResult<usize> {
    let flags = derived.column(IS_BLACK_FRIDAY_WEEK)?.i32()?;
    Ok(flags.into_iter().filter(|flag| *flag == Some(1)).count())
}

/// Reads the configured source object, aggregates it and overwrites every view.
pub async fn run_analysis(store: &ObjectStore, config: &PipelineConfig) -> Result<AnalysisReport> {
    let source_key = config.source.key.as_str();
    tracing::info!(source = %store.uri(source_key), "loading purchases export");
    let contents = store.get_object(source_key).await?;

    let (raw, derived) = derive_orders(&contents)?;
    let black_friday_rows = count_black_friday_rows(&derived)?;
    tracing::info!(
        parser = raw.parser,
        rows = raw.height(),
        unparsed_dates = raw.unparsed_dates,
        black_friday_rows,
        "purchases export parsed"
    );
    if raw.unparsed_dates > 0 {
        tracing::warn!(
            unparsed_dates = raw.unparsed_dates,
            "rows with unparseable order dates carry null calendar columns"
        );
    }

    let mut views = Vec::with_capacity(AggregateView::ALL.len());
    for (view, frame) in compute_views(&derived)? {
        let location = config.outputs.view_location(view);
        let written = write_partitioned(
            store,
            location,
            &frame,
            view.partition_columns(),
            WriteMode::Overwrite,
        )
        .await?;
        tracing::info!(
            view = view.name(),
            rows = written.rows,
            partitions = written.partitions(),
            "aggregate view written"
        );
        views.push(ViewReport {
            view,
            location: written.location.clone(),
            rows: written.rows,
            partitions: written.partitions(),
        });
    }

    Ok(AnalysisReport {
        source: store.uri(source_key),
        parser: raw.parser,
        source_rows: raw.height(),
        unparsed_dates: raw.unparsed_dates,
        black_friday_rows,
        views,
    })
}

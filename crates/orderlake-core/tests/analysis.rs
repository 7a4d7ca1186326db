use anyhow::Result;
use orderlake_core::aggregates::{AggregateView, ORDER_COUNT, STATE, TOTAL_REVENUE};
use orderlake_core::analysis::{derive_orders, run_analysis};
use orderlake_core::config::PipelineConfig;
use orderlake_core::object_store::ObjectStore;
use orderlake_core::partitioned::read_partitioned;
use orderlake_core::schema::*;
use polars::prelude::*;

fn fixture(name: &str) -> Vec<u8> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../orderlake-parser/tests/data")
        .join(name);
    std::fs::read(path).expect("read fixture")
}

async fn seeded_store(root: &std::path::Path) -> Result<(ObjectStore, PipelineConfig)> {
    let mut config = PipelineConfig::default();
    config.storage.root = root.to_path_buf();
    let store = ObjectStore::local(root);
    store
        .put_object(&config.source.key, fixture("amazon_purchases_sample.csv"))
        .await?;
    Ok((store, config))
}

#[test]
fn black_friday_order_revenue_and_flags() -> Result<()> {
    let (_, derived) = derive_orders(&fixture("amazon_purchases_sample.csv"))?;

    let revenue = derived.column(REVENUE)?.f64()?.get(0).expect("revenue");
    assert_eq!(revenue, 19.99 * 3.0);
    assert!((revenue - 59.97).abs() < 1e-9);

    assert_eq!(derived.column(MONTH)?.i32()?.get(0), Some(11));
    assert_eq!(derived.column(DAY)?.i32()?.get(0), Some(24));
    assert_eq!(derived.column(IS_BLACK_FRIDAY_WEEK)?.i32()?.get(0), Some(1));
    assert_eq!(derived.column(QUARTER)?.i32()?.get(0), Some(4));
    assert_eq!(derived.column(WEEK)?.i32()?.get(0), Some(47));
    // Friday.
    assert_eq!(derived.column(DAY_OF_WEEK)?.i32()?.get(0), Some(6));
    assert_eq!(derived.column(IS_WEEKEND)?.i32()?.get(0), Some(0));
    Ok(())
}

#[test]
fn derived_rows_satisfy_column_invariants() -> Result<()> {
    let (raw, derived) = derive_orders(&fixture("amazon_purchases_sample.csv"))?;
    assert_eq!(derived.height(), raw.height());

    let state = derived.column(SHIPPING_STATE)?.str()?;
    assert_eq!(state.null_count(), 0);
    assert_eq!(state.get(0), Some("CA"));
    assert_eq!(state.get(2), Some(UNKNOWN_STATE));
    assert_eq!(state.get(4), Some("TX"));

    let category = derived.column(CATEGORY)?.str()?;
    assert_eq!(category.get(3), Some(UNKNOWN_CATEGORY));

    let price = derived.column(UNIT_PRICE)?.f64()?;
    let quantity = derived.column(QUANTITY)?.i64()?;
    let revenue = derived.column(REVENUE)?.f64()?;
    let month = derived.column(MONTH)?.i32()?;
    let day = derived.column(DAY)?.i32()?;
    let flag = derived.column(IS_BLACK_FRIDAY_WEEK)?.i32()?;
    for idx in 0..derived.height() {
        let expected = price.get(idx).unwrap() * quantity.get(idx).unwrap() as f64;
        assert_eq!(revenue.get(idx), Some(expected));

        let in_window = month.get(idx) == Some(11)
            && day.get(idx).map_or(false, |d| (22..=28).contains(&d));
        assert_eq!(flag.get(idx), Some(i32::from(in_window)));
    }

    // The unparseable date keeps its row with null calendar columns.
    assert_eq!(derived.column(YEAR)?.null_count(), 1);
    Ok(())
}

#[tokio::test]
async fn analysis_writes_all_views() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (store, config) = seeded_store(dir.path()).await?;

    let report = run_analysis(&store, &config).await?;
    assert_eq!(report.parser, "PURCHASE_EXPORT");
    assert_eq!(report.source_rows, 7);
    assert_eq!(report.unparsed_dates, 1);
    assert_eq!(report.black_friday_rows, 4);
    assert_eq!(report.views.len(), 4);

    let daily = &report.views[0];
    assert_eq!(daily.view, AggregateView::DailySales);
    assert_eq!(daily.location, "processed-data/daily_sales/");
    assert_eq!(daily.rows, 6);
    assert_eq!(daily.partitions, 4);

    let daily_df = read_partitioned(&store, &config.outputs.daily_sales)
        .await?
        .expect("daily view written");
    let black_friday = daily_df
        .lazy()
        .filter(
            col(YEAR)
                .eq(lit(2023))
                .and(col(MONTH).eq(lit(11)))
                .and(col(DAY).eq(lit(24))),
        )
        .collect()?;
    assert_eq!(black_friday.height(), 1);
    assert_eq!(black_friday.column(ORDER_COUNT)?.i64()?.get(0), Some(2));
    let total = black_friday.column(TOTAL_REVENUE)?.f64()?.get(0).unwrap();
    assert!((total - (19.99 * 3.0 + 5.49)).abs() < 1e-9);

    let state_df = read_partitioned(&store, &config.outputs.state_sales)
        .await?
        .expect("state view written");
    let states: Vec<&str> = state_df.column(STATE)?.str()?.into_iter().flatten().collect();
    assert!(states.contains(&UNKNOWN_STATE));
    assert!(!states.iter().any(|state| state.trim() != *state));

    let cube_keys = store.list_prefix(&config.outputs.olap_cube).await?;
    assert!(cube_keys
        .iter()
        .any(|key| key.ends_with("year=2023/month=11/part-00000.snappy.parquet")));
    Ok(())
}

#[tokio::test]
async fn rerunning_analysis_is_byte_identical() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (store, config) = seeded_store(dir.path()).await?;

    let snapshot = |store: ObjectStore| async move {
        let mut files = Vec::new();
        for key in store.list_prefix("processed-data/").await? {
            let bytes = store.get_object(&key).await?;
            files.push((key, bytes));
        }
        anyhow::Ok(files)
    };

    run_analysis(&store, &config).await?;
    let first = snapshot(store.clone()).await?;
    run_analysis(&store, &config).await?;
    let second = snapshot(store.clone()).await?;

    assert!(!first.is_empty());
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn missing_source_aborts_without_writing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ObjectStore::local(dir.path());
    let config = PipelineConfig::default();

    let err = run_analysis(&store, &config).await.unwrap_err();
    assert!(err.to_string().contains("object not found"));
    assert!(store.list_prefix("processed-data/").await?.is_empty());
    Ok(())
}

#![cfg(feature = "runtime")]

use std::env;

use anyhow::Result;
use orderlake_core::config::PipelineConfig;
use orderlake_core::error::PipelineError;
use orderlake_core::lock::SyncLock;
use orderlake_core::object_store::ObjectStore;
use orderlake_core::source::{ChangeFilter, OrderSource, PgOrderSource};
use orderlake_core::sync::{execute_sync, SyncOptions, SyncStatus, SYNC_LOCK_KEY};
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use tokio::runtime::Runtime;

const SCHEMA_SQL: &str = r#"
CREATE TABLE orders (
    order_id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL,
    order_number VARCHAR(32) NOT NULL,
    status VARCHAR(32) NOT NULL,
    total_amount NUMERIC(10, 2) NOT NULL,
    currency VARCHAR(3) DEFAULT 'USD',
    shipping_name TEXT,
    shipping_email TEXT,
    shipping_address_line1 TEXT,
    shipping_address_line2 TEXT,
    shipping_city TEXT,
    shipping_state TEXT,
    shipping_postal_code TEXT,
    shipping_country TEXT,
    shipping_phone TEXT,
    payment_method TEXT,
    payment_status TEXT,
    payment_transaction_id TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP
);
CREATE TABLE order_items (
    order_item_id SERIAL PRIMARY KEY,
    order_id INTEGER NOT NULL REFERENCES orders(order_id),
    asin TEXT,
    title TEXT,
    price NUMERIC(10, 2) NOT NULL,
    quantity INTEGER NOT NULL,
    subtotal NUMERIC(10, 2),
    image_url TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);
"#;

#[test]
fn postgres_sync_reads_new_orders_and_advances() -> Result<()> {
    let database_url = match env::var("ORDERLAKE_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping postgres_sync_reads_new_orders_and_advances because ORDERLAKE_TEST_DATABASE_URL is not set"
            );
            return Ok(());
        }
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let schema = format!("orderlake_test_{}", uuid::Uuid::new_v4().simple());
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await?;
        admin
            .execute(format!("CREATE SCHEMA {schema}").as_str())
            .await?;

        let search_path = format!("SET search_path TO {schema}");
        let pool = PgPoolOptions::new()
            .max_connections(3)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(search_path.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&database_url)
            .await?;

        pool.execute(SCHEMA_SQL).await?;
        pool.execute(
            r#"
            INSERT INTO orders (user_id, order_number, status, total_amount, shipping_state, payment_status, created_at)
            VALUES
                (11, 'ORD-1', 'confirmed', 59.97, 'ca', 'paid', '2023-11-24 10:00:00'),
                (12, 'ORD-2', 'shipped', 15.00, NULL, 'paid', '2023-11-25 11:30:00');
            INSERT INTO order_items (order_id, asin, title, price, quantity, subtotal, created_at)
            VALUES
                (1, 'B000000001', 'Cable', 19.99, 3, 59.97, '2023-11-24 10:00:00'),
                (2, 'B000000002', 'Mug', 7.50, 2, 15.00, '2023-11-25 11:30:00');
            "#,
        )
        .await?;

        let source = PgOrderSource::new(pool.clone());
        let filter = ChangeFilter {
            last_order_id: 1,
            recent_since: None,
        };
        let headers = source.fetch_orders(&filter).await?;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].order_id, 2);
        assert_eq!(headers[0].user_id.as_deref(), Some("12"));
        assert_eq!(headers[0].total_amount, Some(15.0));

        let dir = tempfile::tempdir()?;
        let store = ObjectStore::local(dir.path());
        let mut config = PipelineConfig::default();
        config.storage.root = dir.path().to_path_buf();

        let report = execute_sync(&pool, &store, &config, SyncOptions::default()).await?;
        assert_eq!(report.status, SyncStatus::Synced);
        assert_eq!(report.rows_written, 2);
        let checkpoint = report.new_checkpoint.expect("checkpoint advanced");
        assert_eq!(checkpoint.last_order_id, 2);
        assert_eq!(checkpoint.last_synced_date, "2023-11-25 11:30:00");

        let again = execute_sync(&pool, &store, &config, SyncOptions::default()).await?;
        assert_eq!(again.status, SyncStatus::NoNewOrders);

        // A second sync fails instead of waiting on the lock.
        let held = SyncLock::try_acquire(&pool, SYNC_LOCK_KEY).await?;
        match execute_sync(&pool, &store, &config, SyncOptions::default()).await {
            Err(PipelineError::SyncInProgress { key }) => assert_eq!(key, SYNC_LOCK_KEY),
            other => panic!("expected SyncInProgress, got {other:?}"),
        }
        held.release().await?;

        let after = execute_sync(&pool, &store, &config, SyncOptions::default()).await?;
        assert_eq!(after.status, SyncStatus::NoNewOrders);

        pool.close().await;
        admin
            .execute(format!("DROP SCHEMA {schema} CASCADE").as_str())
            .await?;
        Ok(())
    })
}

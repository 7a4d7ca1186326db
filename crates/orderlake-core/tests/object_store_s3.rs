#![cfg(feature = "runtime")]

use anyhow::{Context, Result};
use orderlake_core::config::{StorageConfig, StorageKind};
use orderlake_core::object_store::{ObjectStore, StoreError};
use uuid::Uuid;

const REQUIRED_VARS: &[&str] = &[
    "ORDERLAKE_TEST_S3_BUCKET",
    "ORDERLAKE_TEST_S3_ENDPOINT",
    "ORDERLAKE_TEST_S3_ACCESS_KEY_ID",
    "ORDERLAKE_TEST_S3_SECRET_ACCESS_KEY",
];

fn s3_config_from_env() -> Option<StorageConfig> {
    for &var in REQUIRED_VARS {
        if std::env::var(var)
            .ok()
            .filter(|value| !value.is_empty())
            .is_none()
        {
            return None;
        }
    }

    Some(StorageConfig {
        kind: StorageKind::S3,
        bucket: std::env::var("ORDERLAKE_TEST_S3_BUCKET").ok(),
        region: std::env::var("ORDERLAKE_TEST_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        endpoint: std::env::var("ORDERLAKE_TEST_S3_ENDPOINT").ok(),
        access_key_id: std::env::var("ORDERLAKE_TEST_S3_ACCESS_KEY_ID").ok(),
        secret_access_key: std::env::var("ORDERLAKE_TEST_S3_SECRET_ACCESS_KEY").ok(),
        force_path_style: std::env::var("ORDERLAKE_TEST_S3_FORCE_PATH_STYLE")
            .map(|value| value == "true" || value == "1")
            .unwrap_or(true),
        ..StorageConfig::default()
    })
}

#[tokio::test]
async fn s3_object_store_put_list_delete() -> Result<()> {
    let Some(config) = s3_config_from_env() else {
        eprintln!(
            "Skipping S3 object store test; set {} to enable",
            REQUIRED_VARS.join(", ")
        );
        return Ok(());
    };

    let store = ObjectStore::from_config(&config)
        .await
        .context("failed to build S3 object store")?;
    let prefix = format!("orderlake-test/{}/", Uuid::new_v4());
    let key = format!("{prefix}year=2024/part-00000.snappy.parquet");
    let payload = b"orderlake integration test".to_vec();

    store
        .put_object(&key, payload.clone())
        .await
        .context("upload to S3 failed")?;

    let listed = store
        .list_prefix(&prefix)
        .await
        .context("list prefix failed")?;
    assert_eq!(listed, vec![key.clone()]);
    assert_eq!(store.get_object(&key).await?, payload);

    let deleted = store
        .delete_prefix(&prefix)
        .await
        .context("cleanup delete failed")?;
    assert_eq!(deleted.len(), 1);
    assert!(matches!(
        store.get_object(&key).await,
        Err(StoreError::NotFound(_))
    ));

    Ok(())
}

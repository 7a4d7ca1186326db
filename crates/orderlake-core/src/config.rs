use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

use crate::aggregates::AggregateView;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("database connection is not configured; set DATABASE_URL or [database] host")]
    MissingDatabase,
}

/// Everything a pipeline run needs, resolved once at the process boundary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub outputs: OutputPaths,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" | "file" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            other => Err(ConfigError::InvalidValue {
                key: "storage.kind",
                message: format!("unknown storage kind '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Root directory for the local backend.
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            root: PathBuf::from("./data"),
            bucket: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Object key of the bulk purchases CSV.
    pub key: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            key: "amazon-purchases.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputPaths {
    pub daily_sales: String,
    pub state_sales: String,
    pub category_sales: String,
    pub olap_cube: String,
    pub incremental_orders: String,
    pub checkpoint: String,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            daily_sales: "processed-data/daily_sales/".to_string(),
            state_sales: "processed-data/state_sales/".to_string(),
            category_sales: "processed-data/category_sales/".to_string(),
            olap_cube: "processed-data/olap_cube/".to_string(),
            incremental_orders: "processed-data/incremental-orders/".to_string(),
            checkpoint: "processed-data/etl-checkpoint/".to_string(),
        }
    }
}

impl OutputPaths {
    pub fn view_location(&self, view: AggregateView) -> &str {
        match view {
            AggregateView::DailySales => &self.daily_sales,
            AggregateView::StateSales => &self.state_sales,
            AggregateView::CategorySales => &self.category_sales,
            AggregateView::OlapCube => &self.olap_cube,
        }
    }

    /// Resolves a dataset by name: a view name, `incremental_orders` or `checkpoint`.
    ///
    /// The location is normalized to end in `/`, so it is safe to use as a
    /// listing or deletion prefix.
    pub fn dataset_location(&self, name: &str) -> Option<String> {
        let location = if let Some(view) = AggregateView::from_name(name) {
            self.view_location(view)
        } else {
            match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                "incremental_orders" => &self.incremental_orders,
                "checkpoint" | "etl_checkpoint" => &self.checkpoint,
                _ => return None,
            }
        };
        Some(normalize_location(location))
    }

    fn named(&self) -> [(&'static str, &str); 6] {
        [
            ("outputs.daily_sales", &self.daily_sales),
            ("outputs.state_sales", &self.state_sales),
            ("outputs.category_sales", &self.category_sales),
            ("outputs.olap_cube", &self.olap_cube),
            ("outputs.incremental_orders", &self.incremental_orders),
            ("outputs.checkpoint", &self.checkpoint),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual fields.
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: 5432,
            name: None,
            user: None,
            password: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.host.is_some()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let mut options = if let Some(url) = &self.url {
            PgConnectOptions::from_str(url).map_err(|err| ConfigError::InvalidValue {
                key: "database.url",
                message: err.to_string(),
            })?
        } else {
            let host = self.host.as_deref().ok_or(ConfigError::MissingDatabase)?;
            let mut options = PgConnectOptions::new().host(host).port(self.port);
            if let Some(name) = &self.name {
                options = options.database(name);
            }
            if let Some(user) = &self.user {
                options = options.username(user);
            }
            options
        };

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        Ok(options)
    }
}

/// Which rows the incremental extract selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// `order_id > last_id OR DATE(created_at) >= today - lookback`.
    #[default]
    IdOrRecent,
    /// `order_id > last_id` only.
    IdOnly,
}

/// What to do when a checkpoint exists but cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Abort the run.
    #[default]
    Strict,
    /// Log a warning and start again from the default cursor.
    ResetOnError,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub lookback_days: u32,
    pub capture: CaptureMode,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: 1,
            capture: CaptureMode::IdOrRecent,
            checkpoint_policy: CheckpointPolicy::Strict,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads the optional config file, applies process environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("ORDERLAKE_STORAGE_KIND") {
            self.storage.kind = kind.parse()?;
        }
        if let Some(root) = lookup("ORDERLAKE_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(bucket) = lookup("ORDERLAKE_S3_BUCKET") {
            self.storage.bucket = Some(bucket);
        }
        if let Some(region) = lookup("ORDERLAKE_S3_REGION") {
            self.storage.region = region;
        }
        if let Some(endpoint) = lookup("ORDERLAKE_S3_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(access_key) = lookup("ORDERLAKE_S3_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(access_key);
        }
        if let Some(secret) = lookup("ORDERLAKE_S3_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(secret);
        }
        if let Some(force) = lookup("ORDERLAKE_S3_FORCE_PATH_STYLE") {
            self.storage.force_path_style = parse_bool("storage.force_path_style", &force)?;
        }
        if let Some(key) = lookup("ORDERLAKE_SOURCE_KEY") {
            self.source.key = key;
        }
        if let Some(url) = lookup("ORDERLAKE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(password) = lookup("ORDERLAKE_DATABASE_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(days) = lookup("ORDERLAKE_LOOKBACK_DAYS") {
            self.sync.lookback_days =
                days.trim()
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: "sync.lookback_days",
                        message: err.to_string(),
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "source.key",
                message: "must not be empty".to_string(),
            });
        }

        let named = self.outputs.named();
        for (idx, (key, location)) in named.iter().enumerate() {
            let normalized = normalize_location(location);
            if normalized.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must not be empty".to_string(),
                });
            }
            for (other_key, other) in named.iter().skip(idx + 1) {
                let other = normalize_location(other);
                if normalized.starts_with(&other) || other.starts_with(&normalized) {
                    return Err(ConfigError::InvalidValue {
                        key,
                        message: format!("overlaps with {other_key} ('{other}')"),
                    });
                }
            }
        }

        if self.storage.kind == StorageKind::S3
            && self
                .storage
                .bucket
                .as_deref()
                .map_or(true, |bucket| bucket.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                key: "storage.bucket",
                message: "required for the s3 backend".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "database.max_connections",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Normalizes an output location to `a/b/` form (no leading slash, one trailing slash).
pub fn normalize_location(location: &str) -> String {
    let trimmed = location.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_processed_data_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.source.key, "amazon-purchases.csv");
        assert_eq!(
            config.outputs.view_location(AggregateView::OlapCube),
            "processed-data/olap_cube/"
        );
        assert_eq!(config.outputs.checkpoint, "processed-data/etl-checkpoint/");
        assert_eq!(config.sync.lookback_days, 1);
        assert_eq!(config.sync.capture, CaptureMode::IdOrRecent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_toml_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [storage]
            kind = "s3"
            bucket = "ecommerce-analytics"

            [source]
            key = "raw/purchases.csv"

            [database]
            host = "db.internal"
            name = "ecommerce_orders"
            user = "etl"

            [sync]
            lookback_days = 3
            capture = "id_only"
            checkpoint_policy = "reset_on_error"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("ecommerce-analytics"));
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.source.key, "raw/purchases.csv");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.sync.lookback_days, 3);
        assert_eq!(config.sync.capture, CaptureMode::IdOnly);
        assert_eq!(config.sync.checkpoint_policy, CheckpointPolicy::ResetOnError);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = PipelineConfig::from_toml_str("[sync]\nlookback = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides(lookup(&[
                ("ORDERLAKE_STORAGE_KIND", "s3"),
                ("ORDERLAKE_S3_BUCKET", "from-env"),
                ("DATABASE_URL", "postgres://etl@localhost/orders"),
                ("ORDERLAKE_DATABASE_PASSWORD", "secret"),
                ("ORDERLAKE_LOOKBACK_DAYS", "2"),
            ]))
            .expect("apply overrides");

        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("from-env"));
        assert_eq!(config.sync.lookback_days, 2);
        assert!(config.database.is_configured());
        assert!(config.database.connect_options().is_ok());
    }

    #[test]
    fn prefixed_database_url_wins() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides(lookup(&[
                ("ORDERLAKE_DATABASE_URL", "postgres://a@localhost/one"),
                ("DATABASE_URL", "postgres://b@localhost/two"),
            ]))
            .unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://a@localhost/one")
        );
    }

    #[test]
    fn invalid_lookback_is_reported() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_overrides(lookup(&[("ORDERLAKE_LOOKBACK_DAYS", "yesterday")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "sync.lookback_days",
                ..
            }
        ));
    }

    #[test]
    fn s3_requires_bucket() {
        let mut config = PipelineConfig::default();
        config.storage.kind = StorageKind::S3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "storage.bucket",
                ..
            })
        ));
    }

    #[test]
    fn overlapping_outputs_are_rejected() {
        let mut config = PipelineConfig::default();
        config.outputs.checkpoint = "/processed-data/daily_sales".to_string();
        assert!(config.validate().is_err());

        let mut nested = PipelineConfig::default();
        nested.outputs.incremental_orders = "processed-data/olap_cube/incremental/".to_string();
        assert!(nested.validate().is_err());
    }

    #[test]
    fn missing_database_is_an_error() {
        let config = DatabaseConfig::default();
        assert!(!config.is_configured());
        assert!(matches!(
            config.connect_options(),
            Err(ConfigError::MissingDatabase)
        ));
    }

    #[test]
    fn resolves_dataset_names() {
        let outputs = OutputPaths::default();
        assert_eq!(
            outputs.dataset_location("state-sales").as_deref(),
            Some("processed-data/state_sales/")
        );
        assert_eq!(
            outputs.dataset_location("incremental_orders").as_deref(),
            Some("processed-data/incremental-orders/")
        );
        assert_eq!(
            outputs.dataset_location("etl-checkpoint").as_deref(),
            Some("processed-data/etl-checkpoint/")
        );
        assert_eq!(outputs.dataset_location("weekly"), None);
    }

    #[tokio::test]
    async fn dataset_prefix_does_not_reach_sibling_directories() -> anyhow::Result<()> {
        let mut config = PipelineConfig::default();
        config.outputs.daily_sales = "processed-data/daily".to_string();
        config.outputs.incremental_orders = "processed-data/daily_inc/".to_string();
        config.validate()?;

        let location = config
            .outputs
            .dataset_location("daily_sales")
            .ok_or_else(|| anyhow::anyhow!("daily_sales resolves"))?;
        assert_eq!(location, "processed-data/daily/");

        let dir = tempfile::tempdir()?;
        let store = crate::object_store::ObjectStore::local(dir.path());
        store
            .put_object("processed-data/daily/year=2023/month=11/part-00000.snappy.parquet", vec![1])
            .await?;
        store
            .put_object("processed-data/daily_inc/year=2024/month=1/part-x.snappy.parquet", vec![2])
            .await?;

        let deleted = store.delete_prefix(&location).await?;
        assert_eq!(
            deleted,
            vec!["processed-data/daily/year=2023/month=11/part-00000.snappy.parquet".to_string()]
        );
        assert_eq!(store.list_prefix("processed-data/daily_inc/").await?.len(), 1);
        Ok(())
    }

    #[test]
    fn normalizes_locations() {
        assert_eq!(normalize_location("/a/b"), "a/b/");
        assert_eq!(normalize_location("a/b/"), "a/b/");
        assert_eq!(normalize_location("  "), "");
    }
}

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Establish a Postgres connection pool for the transactional order database.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "database connection pool established"
    );
    Ok(pool)
}

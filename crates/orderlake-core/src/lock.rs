//! Single-writer guard for incremental syncs.

use sqlx::pool::PoolConnection;
use sqlx::Postgres;

use crate::db::DbPool;
use crate::error::{PipelineError, Result};

/// Postgres session advisory lock pinned to one pooled connection.
///
/// Acquisition never waits: a second sync against the same database fails
/// with [`PipelineError::SyncInProgress`]. Dropping the guard without
/// [`SyncLock::release`] closes its connection, which ends the session and
/// frees the lock server-side.
pub struct SyncLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl SyncLock {
    pub async fn try_acquire(pool: &DbPool, key: i64) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(conn.as_mut())
            .await?;
        if !acquired {
            tracing::warn!(key, "sync lock held by another session");
            return Err(PipelineError::SyncInProgress { key });
        }

        tracing::info!(key, "sync lock acquired");
        Ok(Self {
            conn: Some(conn),
            key,
        })
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(conn.as_mut())
            .await?;
        if released {
            tracing::info!(key = self.key, "sync lock released");
        } else {
            tracing::warn!(key = self.key, "sync lock was no longer held at release");
        }
        Ok(())
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(key = self.key, "sync lock dropped unreleased; closing its session");
            drop(conn.detach());
        }
    }
}

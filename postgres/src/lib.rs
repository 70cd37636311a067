//! `PostgreSQL`-backed [`SnapshotCache`] implementation.
//!
//! Stores each snapshot as a row keyed by its [`SnapshotKey`]'s string
//! form, with the cursor split into its `fact_id`/`position` parts so the
//! table stays queryable (e.g. "snapshots behind position N") without
//! decoding the blob.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE snapshots (
//!     key TEXT PRIMARY KEY,
//!     fact_id UUID,
//!     position BIGINT NOT NULL,
//!     bytes BYTEA NOT NULL,
//!     compressed BOOLEAN NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

use factflow_core::{Cursor, CoreError, FactId, FactPosition, Result, Snapshot, SnapshotCache, SnapshotKey};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// A snapshot cache backed by a `PostgreSQL` table.
///
/// Read failures (including rows that fail to decode) degrade to a
/// cache miss, as [`SnapshotCache::get`] documents; only write failures
/// surface as [`CoreError::SnapshotIo`].
#[derive(Clone)]
pub struct PostgresSnapshotCache {
    pool: PgPool,
    table_name: String,
}

impl PostgresSnapshotCache {
    /// Build a cache using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool, table_name: String) -> Self {
        Self { pool, table_name }
    }

    /// Connect to `database_url` and build a cache over it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SnapshotIo`] if the connection cannot be
    /// established.
    pub async fn connect(database_url: &str, table_name: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::SnapshotIo(format!("failed to connect: {e}")))?;

        Ok(Self::new(pool, table_name))
    }

    /// Run the bundled migrations, creating the snapshots table if it
    /// doesn't already exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SnapshotIo`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::SnapshotIo(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The table this cache reads and writes.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl SnapshotCache for PostgresSnapshotCache {
    fn get(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>>> + Send + '_>> {
        let key_str = key.to_string();
        let key = key.clone();
        Box::pin(async move {
            let query = format!(
                "SELECT fact_id, position, bytes, compressed FROM {} WHERE key = $1",
                self.table_name
            );

            let row: Option<(Option<uuid::Uuid>, i64, Vec<u8>, bool)> = match sqlx::query_as(&query)
                .bind(&key_str)
                .fetch_optional(&self.pool)
                .await
            {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!(key = %key_str, error = %err, "snapshot read failed, treating as a miss");
                    return Ok(None);
                }
            };

            #[allow(clippy::cast_sign_loss)]
            Ok(row.map(|(fact_id, position, bytes, compressed)| Snapshot {
                key,
                last_fact: Cursor::from_parts(fact_id.map(FactId::from_uuid), FactPosition::new(position as u64)),
                bytes,
                compressed,
            }))
        })
    }

    fn set(&self, snapshot: Snapshot) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO {} (key, fact_id, position, bytes, compressed, updated_at)
                 VALUES ($1, $2, $3, $4, $5, now())
                 ON CONFLICT (key) DO UPDATE
                 SET fact_id = EXCLUDED.fact_id,
                     position = EXCLUDED.position,
                     bytes = EXCLUDED.bytes,
                     compressed = EXCLUDED.compressed,
                     updated_at = now()",
                self.table_name
            );

            #[allow(clippy::cast_possible_wrap)]
            let position_i64 = snapshot.last_fact.position().serial() as i64;

            sqlx::query(&query)
                .bind(snapshot.key.to_string())
                .bind(snapshot.last_fact.fact_id().map(FactId::as_uuid))
                .bind(position_i64)
                .bind(&snapshot.bytes)
                .bind(snapshot.compressed)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::SnapshotIo(format!("failed to write snapshot: {e}")))?;

            Ok(())
        })
    }

    fn delete(&self, key: &SnapshotKey) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let query = format!("DELETE FROM {} WHERE key = $1", self.table_name);
            sqlx::query(&query)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::SnapshotIo(format!("failed to delete snapshot: {e}")))?;
            Ok(())
        })
    }
}

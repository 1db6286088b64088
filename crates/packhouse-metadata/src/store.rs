//! SQLite Metadata Store Implementation
//!
//! This module implements the [`MetadataStore`] trait on SQLite.
//!
//! ## Why SQLite?
//!
//! For a single-node registry, SQLite is ideal:
//! - **Zero configuration**: embedded, no separate server process
//! - **ACID transactions**: batch numbering and activation stay consistent
//! - **Low latency**: every query here is an indexed lookup
//!
//! ## Usage
//!
//! ### File-Based (Production)
//! ```ignore
//! use packhouse_metadata::SqliteMetadataStore;
//!
//! // Creates metadata.db (or opens it if it exists) and runs migrations.
//! let store = SqliteMetadataStore::new("metadata.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqliteMetadataStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! ### Runtime Queries
//!
//! This implementation uses runtime queries (`sqlx::query` /
//! `sqlx::query_as`) instead of the compile-time `sqlx::query!` macros, so
//! the crate builds without a DATABASE_URL in the environment.
//!
//! ### Migrations
//!
//! The schema ships in `migrations/` and runs automatically on startup via
//! `sqlx::migrate!`. New databases get the full schema; old ones are
//! upgraded in place.
//!
//! ### Transactions
//!
//! Batch creation (max-number read + insert) and activation (clear default
//! + set default, across every target) each run inside one transaction.

use crate::{
    error::{MetadataError, Result},
    types::{BatchRecord, PackageRecord},
    MetadataStore,
};
use async_trait::async_trait;
use packhouse_core::{BatchRef, PackageRef, StreamPath};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

const BATCH_COLUMNS: &str = "id, package_id, major_version, schema_title, stream_slug, \
     batch_number, is_default, last_offset, author, created_at, updated_at";

/// SQLite-based metadata store.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) a file-backed store and run migrations.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create an in-memory store (for testing).
    ///
    /// The pool is pinned to a single connection: every SQLite `:memory:`
    /// connection is its own private database, so a second connection
    /// would see none of the tables.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

async fn find_package_row<'e, E>(executor: E, package: &PackageRef) -> Result<Option<PackageRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, PackageRecord>(
        "SELECT id, catalog_slug, package_slug, created_at
         FROM packages
         WHERE catalog_slug = ? AND package_slug = ?",
    )
    .bind(&package.catalog_slug)
    .bind(&package.package_slug)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

async fn find_batch_row<'e, E>(
    executor: E,
    package_id: i64,
    stream: &StreamPath,
    batch_number: i64,
) -> Result<Option<BatchRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, BatchRecord>(&format!(
        "SELECT {BATCH_COLUMNS}
         FROM batches
         WHERE package_id = ? AND major_version = ? AND schema_title = ?
           AND stream_slug = ? AND batch_number = ?",
    ))
    .bind(package_id)
    .bind(stream.major_version as i64)
    .bind(&stream.schema_title)
    .bind(&stream.stream_slug)
    .bind(batch_number)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_package(&self, package: &PackageRef) -> Result<PackageRecord> {
        let now = Self::now_ms();

        let result = sqlx::query(
            "INSERT INTO packages (catalog_slug, package_slug, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(&package.catalog_slug)
        .bind(&package.package_slug)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PackageRecord {
            id: result.last_insert_rowid(),
            catalog_slug: package.catalog_slug.clone(),
            package_slug: package.package_slug.clone(),
            created_at: now,
        })
    }

    async fn find_package(&self, package: &PackageRef) -> Result<Option<PackageRecord>> {
        find_package_row(&self.pool, package).await
    }

    async fn create_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
        author: &str,
    ) -> Result<BatchRecord> {
        let mut tx = self.pool.begin().await?;
        let now = Self::now_ms();

        let current_max: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(batch_number), 0)
             FROM batches
             WHERE package_id = ? AND major_version = ? AND schema_title = ? AND stream_slug = ?",
        )
        .bind(package_id)
        .bind(stream.major_version as i64)
        .bind(&stream.schema_title)
        .bind(&stream.stream_slug)
        .fetch_one(&mut *tx)
        .await?;

        let batch_number = current_max + 1;

        let result = sqlx::query(
            "INSERT INTO batches (package_id, major_version, schema_title, stream_slug,
                                  batch_number, is_default, author, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(package_id)
        .bind(stream.major_version as i64)
        .bind(&stream.schema_title)
        .bind(&stream.stream_slug)
        .bind(batch_number)
        .bind(author)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(BatchRecord {
            id: result.last_insert_rowid(),
            package_id,
            major_version: stream.major_version as i64,
            schema_title: stream.schema_title.clone(),
            stream_slug: stream.stream_slug.clone(),
            batch_number,
            is_default: false,
            last_offset: None,
            author: author.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
        batch_number: u64,
    ) -> Result<Option<BatchRecord>> {
        find_batch_row(&self.pool, package_id, stream, batch_number as i64).await
    }

    async fn latest_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
    ) -> Result<Option<BatchRecord>> {
        let row = sqlx::query_as::<_, BatchRecord>(&format!(
            "SELECT {BATCH_COLUMNS}
             FROM batches
             WHERE package_id = ? AND major_version = ? AND schema_title = ? AND stream_slug = ?
             ORDER BY batch_number DESC
             LIMIT 1",
        ))
        .bind(package_id)
        .bind(stream.major_version as i64)
        .bind(&stream.schema_title)
        .bind(&stream.stream_slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn default_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
    ) -> Result<Option<BatchRecord>> {
        let row = sqlx::query_as::<_, BatchRecord>(&format!(
            "SELECT {BATCH_COLUMNS}
             FROM batches
             WHERE package_id = ? AND major_version = ? AND schema_title = ? AND stream_slug = ?
               AND is_default = 1",
        ))
        .bind(package_id)
        .bind(stream.major_version as i64)
        .bind(&stream.schema_title)
        .bind(&stream.stream_slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_batch_tail(&self, batch_id: i64, last_offset: u64) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE batches SET last_offset = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_offset as i64)
        .bind(Self::now_ms())
        .bind(batch_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(MetadataError::BatchNotFound(format!("id {batch_id}")));
        }

        Ok(())
    }

    async fn set_active_batches(&self, targets: &[BatchRef]) -> Result<Vec<BatchRecord>> {
        let mut tx = self.pool.begin().await?;
        let now = Self::now_ms();
        let mut activated = Vec::with_capacity(targets.len());

        for target in targets {
            let package = find_package_row(&mut *tx, &target.stream.package)
                .await?
                .ok_or_else(|| {
                    MetadataError::PackageNotFound(target.stream.package.to_string())
                })?;

            let batch = find_batch_row(
                &mut *tx,
                package.id,
                &target.stream,
                target.batch_number as i64,
            )
            .await?
            .ok_or_else(|| MetadataError::BatchNotFound(target.to_string()))?;

            // Clear the stream's current default before setting the new one;
            // the partial unique index allows at most one default per stream.
            sqlx::query(
                "UPDATE batches SET is_default = 0, updated_at = ?
                 WHERE package_id = ? AND major_version = ? AND schema_title = ?
                   AND stream_slug = ? AND is_default = 1",
            )
            .bind(now)
            .bind(package.id)
            .bind(target.stream.major_version as i64)
            .bind(&target.stream.schema_title)
            .bind(&target.stream.stream_slug)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE batches SET is_default = 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(batch.id)
                .execute(&mut *tx)
                .await?;

            let updated = sqlx::query_as::<_, BatchRecord>(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?",
            ))
            .bind(batch.id)
            .fetch_one(&mut *tx)
            .await?;

            activated.push(updated);
        }

        tx.commit().await?;
        Ok(activated)
    }

    async fn try_acquire_lock(&self, key: &str, holder: &str, ttl_ms: i64) -> Result<bool> {
        let now = Self::now_ms();
        let expires_at = now + ttl_ms;

        // Compare-and-swap upsert: claim the row when it is absent, expired,
        // or already ours (renewal). Anything else leaves the row untouched.
        sqlx::query(
            "INSERT INTO locks (key, holder, acquired_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE locks.expires_at <= excluded.acquired_at
                OR locks.holder = excluded.holder",
        )
        .bind(key)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        // Verify who actually holds the lock now.
        let current: Option<String> = sqlx::query_scalar("SELECT holder FROM locks WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(current.as_deref() == Some(holder))
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM locks WHERE key = ? AND holder = ?")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

//! Packhouse Metadata Store
//!
//! This crate tracks the registry's bookkeeping state, everything the data
//! plane needs to answer "which batch am I writing?", "where do I resume?",
//! and "who holds the upload lock?".
//!
//! ## Purpose
//!
//! While chunk files hold the actual record data in object storage, the
//! metadata store tracks:
//! - **Packages**: registered catalog/package identities
//! - **Batches**: the generations of each logical stream, their authors,
//!   their default flags, and the highest offset written so far
//! - **Locks**: advisory leases that serialize writers per stream
//!
//! ## Why Do We Need This?
//!
//! Without metadata, simple questions become expensive or impossible:
//! - "Resume my upload" → which offset comes next? (would require listing
//!   and parsing every chunk file)
//! - "Fetch the stream" → which batch is the default?
//! - "Can I write?" → is another session already uploading this stream?
//!
//! With metadata, all of these are single indexed SQLite queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Uploader   │
//! └──────┬───────┘
//!        │ writes chunks
//!        ▼
//! ┌──────────────┐     ┌──────────────────┐
//! │ Object store │ ←──→│  Metadata Store  │ ◄── You are here
//! │   (chunks)   │     │     (SQLite)     │
//! └──────────────┘     └────────┬─────────┘
//!                               │ queries
//!                      ┌────────┴─────────┐
//!                      │     Fetcher      │
//!                      └──────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use packhouse_metadata::{MetadataStore, SqliteMetadataStore};
//! use packhouse_core::{PackageRef, StreamPath};
//!
//! let store = SqliteMetadataStore::new("metadata.db").await?;
//!
//! let package = store
//!     .create_package(&PackageRef::new("noaa", "daily-temps"))
//!     .await?;
//!
//! let stream = StreamPath::new(package.package_ref(), 1, "TemperatureReading", "us-west");
//! let batch = store.create_batch(package.id, &stream, "ingest-bot").await?;
//! assert_eq!(batch.batch_number, 1);
//!
//! // After writing records 0..=499 to object storage:
//! store.update_batch_tail(batch.id, 499).await?;
//!
//! // Publish: make batch 1 the stream default, atomically.
//! store.set_active_batches(&[stream.batch(1)]).await?;
//! ```
//!
//! ## Thread Safety
//!
//! All implementations are `Send + Sync` and safe to share across async
//! tasks via `Arc<dyn MetadataStore>`. The SQLite backend uses an sqlx
//! connection pool; multi-statement operations run inside transactions.

pub mod auth;
pub mod error;
pub mod lock;
pub mod store;
pub mod types;

pub use auth::{OpenPermissions, Permission, PermissionCheck, StaticPermissions};
pub use error::{MetadataError, Result};
pub use lock::{upload_lock_key, DistributedLock, LockLease, DEFAULT_LOCK_TTL, LOCK_RETRY_INTERVAL};
pub use store::SqliteMetadataStore;
pub use types::{BatchRecord, PackageRecord};

use async_trait::async_trait;
use packhouse_core::{BatchRef, PackageRef, StreamPath};

/// Metadata store trait, abstracting over database backends.
///
/// The SQLite implementation ([`SqliteMetadataStore`]) is the single-node
/// backend; the trait keeps the rest of the system indifferent to where
/// the bookkeeping lives.
///
/// ## Error Handling
///
/// All methods return [`Result<T>`]. Lookups that can legitimately miss
/// return `Ok(None)` rather than an error; the `PackageNotFound` and
/// `BatchNotFound` variants are reserved for operations that *require*
/// the row to exist (such as activation).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ============================================================
    // PACKAGE OPERATIONS
    // ============================================================

    /// Register a new package identity.
    ///
    /// # Errors
    ///
    /// - `Database`: the identity already exists (unique constraint) or the
    ///   insert failed
    async fn create_package(&self, package: &PackageRef) -> Result<PackageRecord>;

    /// Look up a package by its catalog/package slugs.
    ///
    /// Returns `Ok(None)` when the package has never been registered.
    async fn find_package(&self, package: &PackageRef) -> Result<Option<PackageRecord>>;

    // ============================================================
    // BATCH OPERATIONS
    // ============================================================

    /// Create the next batch of a logical stream.
    ///
    /// Batch numbers count from 1 and are assigned atomically: the current
    /// maximum for the stream is read and the new row inserted in one
    /// transaction, so two concurrent creates can never mint the same
    /// number.
    ///
    /// # Arguments
    ///
    /// * `package_id` - Row id of the owning package
    /// * `stream` - The logical stream the batch belongs to
    /// * `author` - Username recorded as the batch creator
    ///
    /// # Returns
    ///
    /// The freshly inserted row, with `last_offset` unset and
    /// `is_default` false.
    async fn create_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
        author: &str,
    ) -> Result<BatchRecord>;

    /// Look up one specific batch of a stream by generation number.
    async fn find_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
        batch_number: u64,
    ) -> Result<Option<BatchRecord>>;

    /// The highest-numbered batch of a stream, if any exist.
    ///
    /// This is the batch a resumed upload session appends to.
    async fn latest_batch(&self, package_id: i64, stream: &StreamPath)
        -> Result<Option<BatchRecord>>;

    /// The stream's current default batch, if one has been activated.
    ///
    /// At most one batch per stream carries the default flag; a partial
    /// unique index enforces this in the schema itself.
    async fn default_batch(
        &self,
        package_id: i64,
        stream: &StreamPath,
    ) -> Result<Option<BatchRecord>>;

    /// Record the highest offset written to a batch.
    ///
    /// Called after chunk data is durably in object storage, never before;
    /// `last_offset` must only ever describe records a fetcher could
    /// actually read back.
    ///
    /// # Errors
    ///
    /// - `BatchNotFound`: no row with this id exists
    async fn update_batch_tail(&self, batch_id: i64, last_offset: u64) -> Result<()>;

    // ============================================================
    // ACTIVATION
    // ============================================================

    /// Atomically re-point stream defaults at the given batches.
    ///
    /// For every target, the stream's current default flag (if any) is
    /// cleared and the named batch becomes the new default. The whole set
    /// is applied in a single transaction: either every flip happens or
    /// none do, and a consumer querying defaults concurrently sees only
    /// the before or after state.
    ///
    /// # Returns
    ///
    /// The updated batch rows, in target order.
    ///
    /// # Errors
    ///
    /// - `PackageNotFound`: a target names an unregistered package
    /// - `BatchNotFound`: a target names a batch that does not exist
    ///
    /// On error the transaction rolls back and no default changes.
    async fn set_active_batches(&self, targets: &[BatchRef]) -> Result<Vec<BatchRecord>>;

    // ============================================================
    // LOCK OPERATIONS
    // ============================================================

    /// Try once to acquire or renew the advisory lock `key`.
    ///
    /// The attempt succeeds when the lock is free, expired, or already
    /// held by `holder` (renewal). On success the lock's expiry is pushed
    /// `ttl_ms` past the current time.
    ///
    /// Most callers want [`DistributedLock`], which wraps this with holder
    /// token generation and a retry loop.
    ///
    /// # Returns
    ///
    /// `true` when `holder` owns the lock on return.
    async fn try_acquire_lock(&self, key: &str, holder: &str, ttl_ms: i64) -> Result<bool>;

    /// Release the lock `key` if (and only if) `holder` still owns it.
    ///
    /// Idempotent: releasing a lock that expired or was claimed by someone
    /// else is a no-op, not an error.
    async fn release_lock(&self, key: &str, holder: &str) -> Result<()>;
}

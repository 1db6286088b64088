//! Distributed Upload Locks
//!
//! Upload sessions must be exclusive per logical stream: two writers
//! appending to the same batch would race on offset assignment and
//! interleave chunks. This module provides the lease-based lock that
//! enforces that, built on the `locks` table via
//! [`MetadataStore::try_acquire_lock`].
//!
//! ## How It Works
//!
//! ```text
//! acquire("upload/noaa/daily-temps/v1/Temp/us-west", 5 attempts)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────┐
//! │ CAS upsert: claim row if free, expired,     │──── taken ──┐
//! │ or already ours                             │             │
//! └─────────────────────────────────────────────┘             ▼
//!     │ claimed                                       sleep 1s, retry
//!     ▼                                               (bounded)
//!   LockLease { key, holder }
//! ```
//!
//! Every acquisition mints a fresh holder token, so two sessions in the
//! same process contend exactly like sessions on different nodes. The
//! lease carries the token; renewal and release only act on the row while
//! the token still matches, which makes a lease that was lost to expiry
//! harmless rather than destructive.
//!
//! Locks expire on their own after a TTL. A crashed uploader therefore
//! blocks its stream for at most [`DEFAULT_LOCK_TTL`]; live uploaders
//! renew on every write and never hit the expiry.

use crate::{error::Result, MetadataStore};
use packhouse_core::StreamPath;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Delay between acquisition attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long a held lock survives without renewal.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

/// The lock key guarding writes to one logical stream.
pub fn upload_lock_key(stream: &StreamPath) -> String {
    format!("upload/{stream}")
}

/// Proof of lock ownership, returned by [`DistributedLock::acquire`].
///
/// The holder token inside is unique to one acquisition; renew and
/// release go through the lease so they can never touch a lock that has
/// since passed to someone else.
#[derive(Debug, Clone)]
pub struct LockLease {
    key: String,
    holder: String,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lease-based lock manager over the metadata store.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn MetadataStore>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Try to acquire `key`, retrying up to `attempts` times with
    /// [`LOCK_RETRY_INTERVAL`] between tries.
    ///
    /// Returns `Ok(None)` when every attempt found the lock held by
    /// someone else. Database failures surface as errors immediately,
    /// without consuming further attempts.
    pub async fn acquire(&self, key: &str, attempts: u32) -> Result<Option<LockLease>> {
        let holder = Uuid::new_v4().to_string();
        let ttl_ms = self.ttl.as_millis() as i64;
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            if self.store.try_acquire_lock(key, &holder, ttl_ms).await? {
                debug!(key, attempt, "lock acquired");
                return Ok(Some(LockLease {
                    key: key.to_string(),
                    holder,
                }));
            }

            if attempt < attempts {
                tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            }
        }

        debug!(key, attempts, "lock unavailable");
        Ok(None)
    }

    /// Extend the lease's expiry by the configured TTL.
    ///
    /// Returns `false` when the lock is no longer ours (it expired and a
    /// contender claimed it). The caller should treat that as fatal for
    /// whatever the lock was protecting.
    pub async fn renew(&self, lease: &LockLease) -> Result<bool> {
        let ttl_ms = self.ttl.as_millis() as i64;
        self.store
            .try_acquire_lock(&lease.key, &lease.holder, ttl_ms)
            .await
    }

    /// Release the lease. Idempotent; releasing a lease that already
    /// expired or was taken over does nothing.
    pub async fn release(&self, lease: &LockLease) -> Result<()> {
        self.store.release_lock(&lease.key, &lease.holder).await?;
        debug!(key = %lease.key, "lock released");
        Ok(())
    }
}

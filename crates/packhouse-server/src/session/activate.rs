//! Batch activation
//!
//! Flips which batch serves each stream's reads by default. The metadata
//! store performs the whole set of flips in one database transaction, so
//! activation needs no distributed lock and a mid-set failure activates
//! nothing.

use std::collections::HashSet;

use tracing::info;

use packhouse_core::BatchRef;
use packhouse_metadata::Permission;

use crate::error::SessionError;
use crate::server::ServerState;

/// Activate the given batches as their streams' defaults.
///
/// Edit permission is required on every distinct package touched,
/// checked fail-closed before any write. Returns the activated refs as
/// recorded by the store.
pub async fn set_active_batches(
    state: &ServerState,
    username: &str,
    batches: &[BatchRef],
) -> Result<Vec<BatchRef>, SessionError> {
    let mut checked = HashSet::new();
    for batch in batches {
        if !checked.insert(&batch.stream.package) {
            continue;
        }
        let allowed = state
            .permissions
            .has_permission(username, &batch.stream.package, Permission::Edit)
            .await
            .unwrap_or(false);
        if !allowed {
            return Err(SessionError::NotAuthorized);
        }
    }

    let records = state.metadata.set_active_batches(batches).await?;
    info!(count = records.len(), "activated batches");

    let activated = records
        .iter()
        .zip(batches)
        .map(|(record, target)| record.batch_ref(&target.stream.package))
        .collect();
    Ok(activated)
}

//! Record Context
//!
//! A `RecordContext` is one payload record together with its position in
//! the batch that stores it. Payloads are schema-described JSON documents;
//! the registry never inspects them beyond carrying them between clients
//! and chunk storage.
//!
//! ## Offset Semantics
//!
//! Offsets are **per batch**: the first record written to a batch gets
//! offset 0, and every later record gets the previous offset plus one,
//! regardless of how many upload sessions contributed. Offsets are
//! assigned by the server in arrival order and never reused within a
//! batch, which is what makes resume-from-offset well defined.

use serde::{Deserialize, Serialize};

/// One record plus its position and receipt metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordContext {
    /// Position of this record within its batch (0-based)
    pub offset: u64,

    /// Server receipt timestamp (milliseconds since Unix epoch)
    pub received_at: i64,

    /// The record payload itself
    pub payload: serde_json::Value,
}

impl RecordContext {
    pub fn new(offset: u64, received_at: i64, payload: serde_json::Value) -> Self {
        Self {
            offset,
            received_at,
            payload,
        }
    }
}

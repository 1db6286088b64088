//! Row types returned by the metadata store.
//!
//! These mirror the SQLite schema one-to-one: integer columns stay `i64`,
//! timestamps are milliseconds since the Unix epoch, and nullable columns
//! are `Option`. Conversions to the wire-facing identity types live on the
//! records themselves so callers never rebuild slugs by hand.

use packhouse_core::{BatchRef, PackageRef, StreamPath};

/// A registered package (one row in `packages`).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PackageRecord {
    pub id: i64,
    pub catalog_slug: String,
    pub package_slug: String,

    /// Creation time, milliseconds since the Unix epoch
    pub created_at: i64,
}

impl PackageRecord {
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(self.catalog_slug.clone(), self.package_slug.clone())
    }
}

/// One batch of a logical stream (one row in `batches`).
///
/// `last_offset` is the highest record offset written to the batch so far,
/// or `None` when no record has landed yet. [`BatchRecord::next_offset`]
/// turns that into the offset the next uploaded record receives.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BatchRecord {
    pub id: i64,
    pub package_id: i64,
    pub major_version: i64,
    pub schema_title: String,
    pub stream_slug: String,

    /// Generation number within the stream, counted from 1
    pub batch_number: i64,

    /// Whether this batch is the stream's default (the one served when a
    /// consumer does not name a batch explicitly)
    pub is_default: bool,

    pub last_offset: Option<i64>,

    /// Username that created the batch
    pub author: String,

    pub created_at: i64,
    pub updated_at: i64,
}

impl BatchRecord {
    /// Offset the next record written to this batch will be assigned.
    pub fn next_offset(&self) -> u64 {
        self.last_offset.map_or(0, |o| o as u64 + 1)
    }

    /// Rebuild the stream identity, given the owning package's slugs.
    pub fn stream_path(&self, package: &PackageRef) -> StreamPath {
        StreamPath::new(
            package.clone(),
            self.major_version as u32,
            self.schema_title.clone(),
            self.stream_slug.clone(),
        )
    }

    /// Rebuild the full batch identity, given the owning package's slugs.
    pub fn batch_ref(&self, package: &PackageRef) -> BatchRef {
        self.stream_path(package).batch(self.batch_number as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> BatchRecord {
        BatchRecord {
            id: 42,
            package_id: 7,
            major_version: 2,
            schema_title: "TemperatureReading".to_string(),
            stream_slug: "us-west".to_string(),
            batch_number: 3,
            is_default: false,
            last_offset: None,
            author: "ingest-bot".to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn next_offset_starts_at_zero() {
        let mut batch = sample_batch();
        assert_eq!(batch.next_offset(), 0);

        batch.last_offset = Some(0);
        assert_eq!(batch.next_offset(), 1);

        batch.last_offset = Some(249);
        assert_eq!(batch.next_offset(), 250);
    }

    #[test]
    fn batch_ref_round_trips_identity() {
        let package = PackageRef::new("noaa", "daily-temps");
        let batch = sample_batch();
        let re = batch.batch_ref(&package);
        assert_eq!(
            re.to_string(),
            "noaa/daily-temps/v2/TemperatureReading/us-west#batch3"
        );
    }
}

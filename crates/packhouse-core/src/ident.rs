//! Stream and Batch Identity
//!
//! This module defines the identifiers that name data in the registry.
//!
//! ## The Identity Hierarchy
//!
//! ```text
//! PackageRef            catalog/package
//!     │
//! StreamPath            catalog/package/v1/SchemaTitle/stream
//!     │                 (adds major version, schema title, stream slug)
//! BatchRef              catalog/package/v1/SchemaTitle/stream#batch3
//!     │                 (adds the batch generation number)
//! ```
//!
//! A **logical stream** is one named sequence of records inside one major
//! version of a package's schema. Each upload cycle produces a new
//! immutable **batch** of that stream, numbered from 1. Consumers always
//! address data by `BatchRef`.
//!
//! These types travel verbatim inside wire messages, so they derive
//! `Serialize`/`Deserialize`. The `Display` implementations render the
//! canonical slash-separated form used in logs and lock keys.

use serde::{Deserialize, Serialize};

/// A package within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    /// Catalog slug (the publisher namespace)
    pub catalog_slug: String,

    /// Package slug, unique within the catalog
    pub package_slug: String,
}

impl PackageRef {
    pub fn new(catalog_slug: impl Into<String>, package_slug: impl Into<String>) -> Self {
        Self {
            catalog_slug: catalog_slug.into(),
            package_slug: package_slug.into(),
        }
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.catalog_slug, self.package_slug)
    }
}

/// A logical stream: one named record sequence within one major version
/// of a package schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPath {
    /// Owning package
    pub package: PackageRef,

    /// Major version of the package this stream belongs to
    pub major_version: u32,

    /// Title of the schema that describes the records
    pub schema_title: String,

    /// Stream slug, unique within the schema
    pub stream_slug: String,
}

impl StreamPath {
    pub fn new(
        package: PackageRef,
        major_version: u32,
        schema_title: impl Into<String>,
        stream_slug: impl Into<String>,
    ) -> Self {
        Self {
            package,
            major_version,
            schema_title: schema_title.into(),
            stream_slug: stream_slug.into(),
        }
    }

    /// The batch of this stream with the given generation number.
    pub fn batch(&self, batch_number: u64) -> BatchRef {
        BatchRef {
            stream: self.clone(),
            batch_number,
        }
    }
}

impl std::fmt::Display for StreamPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/v{}/{}/{}",
            self.package, self.major_version, self.schema_title, self.stream_slug
        )
    }
}

/// One immutable generation of a logical stream's data.
///
/// Batch numbers are assigned monotonically per stream, starting at 1.
/// A batch never changes after its upload sessions complete; replacing
/// data means writing a new batch and flipping the stream's default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRef {
    /// The logical stream this batch belongs to
    pub stream: StreamPath,

    /// Generation number within the stream (1-based)
    pub batch_number: u64,
}

impl std::fmt::Display for BatchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#batch{}", self.stream, self.batch_number)
    }
}

//! Packhouse Client - async protocol driver
//!
//! This crate provides the reference client for the packhouse wire
//! protocol: connect, upload record payloads into a batch, fetch a
//! batch back out, and flip active batches. It is a small surface;
//! integration tests and command-line tooling are its main consumers.
//!
//! # Examples
//!
//! ```ignore
//! use packhouse_client::Client;
//! use packhouse_core::{PackageRef, StreamPath};
//! use serde_json::json;
//!
//! let stream = StreamPath::new(PackageRef::new("noaa", "daily-temps"), 1, "Reading", "us-west");
//!
//! let mut client = Client::connect("127.0.0.1:7171", "ana").await?;
//! let batch = client
//!     .upload(stream.clone(), false, vec![json!({"temp": 21.5})])
//!     .await?;
//!
//! let records = client.fetch(batch.clone(), 0).await?;
//! client.set_active_batches(vec![batch]).await?;
//! ```

pub mod client;
pub mod error;

pub use client::{Client, ServerEvent};
pub use error::{ClientError, Result};

//! Per-connection session state machines.
//!
//! A connection carries at most one upload session, any number of
//! download sessions, and stateless activation requests. The router owns
//! the session instances and drives them from inbound wire messages;
//! the sessions own the spawned tasks that move the actual bytes.

pub mod activate;
pub mod download;
pub mod upload;

pub use download::{DownloadEvent, DownloadSession};
pub use upload::UploadSession;

pub mod chunk;
pub mod error;
pub mod ident;
pub mod record;

pub use error::{Error, Result};
pub use ident::{BatchRef, PackageRef, StreamPath};
pub use record::RecordContext;

//! Persistent content tree cache.
//!
//! This module owns what is cached locally and when it is trusted:
//! - `ContentNode` records in SQLite, partitioned by workspace, with
//!   indexed lookups by parent and by type
//! - raw payload blobs on disk, one per `(workspace, id)`
//! - the `children_fetched` staleness flag and age-based staleness checks
//!
//! Synchronization against the remote source lives in `crate::sync`; this
//! module never performs network calls.

mod blob;
mod node;
mod store;

pub use blob::BlobStore;
pub use node::{CacheStats, ContentNode, ItemType, Listing, NodeId};
pub use store::NodeStore;

use thiserror::Error;

/// Local persistence failure. Write failures are fatal to the calling
/// operation and always propagate; a missing row is `Ok(None)` on reads,
/// never an error.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("invalid node id: {0:?} (expected hexadecimal digits)")]
  InvalidNodeId(String),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("timestamp parse error: {0}")]
  Timestamp(#[from] chrono::ParseError),

  #[error("storage lock poisoned")]
  LockPoisoned,

  #[error("could not determine data directory")]
  NoDataDir,
}

//! Synchronization engine: keeps the local cache consistent with the remote
//! tree source.
//!
//! Two access patterns share one cache: lazy single-node expansion (fetch a
//! folder's children the first time they are requested) and recursive
//! subtree synchronization (bulk depth-first crawl with per-node failure
//! counting). Invalidation is shallow by design: clearing one folder's
//! `children_fetched` flag never touches its descendants.

mod engine;

pub use engine::{SyncEngine, SyncOptions, SyncOutcome};

use thiserror::Error;

use crate::cache::StoreError;
use crate::remote::RemoteError;

/// Failure of a single synchronization operation.
///
/// `Remote` is recoverable and reported to the caller; the recursive walk
/// converts it into an error counter. `Storage` means the local cache can no
/// longer be trusted and always propagates, aborting even a recursive walk.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Storage(#[from] StoreError),
}

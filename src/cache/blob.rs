//! On-disk store for raw fetched payloads, one JSON file per node.
//!
//! Purely a display/export cache: the tree in the node store never depends
//! on it, and it can always be rebuilt by re-fetching.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::node::NodeId;
use super::StoreError;

/// Blob store rooted at a directory, laid out as
/// `<root>/<workspace>/<id>.json`.
#[derive(Clone)]
pub struct BlobStore {
  root: PathBuf,
}

impl BlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Persist the payload for a node, overwriting any previous one.
  ///
  /// Written to a temp file in the same directory and renamed into place,
  /// so a concurrent reader never observes a half-written blob.
  pub fn save(&self, workspace: &str, id: &NodeId, payload: &Value) -> Result<(), StoreError> {
    let path = self.blob_path(workspace, id);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(payload)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, &path)?;
    Ok(())
  }

  /// Load the last-saved payload for a node, or `None` if never saved.
  pub fn load(&self, workspace: &str, id: &NodeId) -> Result<Option<Value>, StoreError> {
    let path = self.blob_path(workspace, id);
    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
  }

  /// Remove the payload for a node if present. Used by cache eviction.
  pub fn remove(&self, workspace: &str, id: &NodeId) -> Result<(), StoreError> {
    match fs::remove_file(self.blob_path(workspace, id)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn blob_path(&self, workspace: &str, id: &NodeId) -> PathBuf {
    self.root.join(workspace).join(format!("{}.json", id))
  }
}

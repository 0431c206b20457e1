//! Core types for cached content tree nodes.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use super::StoreError;

/// Opaque hexadecimal node identifier, unique within a workspace.
///
/// The all-zero id is the tree root sentinel: it is never stored or fetched,
/// only referenced as a `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
  /// The reserved root sentinel id.
  pub const ROOT_STR: &'static str = "0000000000000000";

  /// Parse and normalize an id. Accepts hexadecimal digits only;
  /// normalizes to lowercase. An all-zero id of any width canonicalizes
  /// to the fixed-width root sentinel, so sentinel comparisons and exact
  /// string lookups in the store agree.
  pub fn parse(s: &str) -> Result<Self, StoreError> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(StoreError::InvalidNodeId(s.to_string()));
    }
    if s.bytes().all(|b| b == b'0') {
      return Ok(Self::root());
    }
    Ok(Self(s.to_ascii_lowercase()))
  }

  /// Wrap an id previously validated by `parse`, e.g. read back from the
  /// store.
  pub(crate) fn from_trusted(s: String) -> Self {
    Self(s)
  }

  /// The root sentinel.
  pub fn root() -> Self {
    Self(Self::ROOT_STR.to_string())
  }

  /// True if this id is the all-zero root sentinel.
  pub fn is_root(&self) -> bool {
    self.0.bytes().all(|b| b == b'0')
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(&self.0)
  }
}

/// Content item type. Open set: unknown tags from the remote side are
/// preserved as `Other`. Only `Folder` may have children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemType {
  Folder,
  Dashboard,
  Search,
  Lookup,
  Report,
  Other(String),
}

impl ItemType {
  /// Canonical lowercase tag, used for the storage column and wire matching.
  pub fn as_str(&self) -> &str {
    match self {
      Self::Folder => "folder",
      Self::Dashboard => "dashboard",
      Self::Search => "search",
      Self::Lookup => "lookup",
      Self::Report => "report",
      Self::Other(tag) => tag,
    }
  }

  /// Parse a tag case-insensitively; unknown tags become `Other`.
  pub fn from_tag(tag: &str) -> Self {
    match tag.to_ascii_lowercase().as_str() {
      "folder" => Self::Folder,
      "dashboard" => Self::Dashboard,
      "search" => Self::Search,
      "lookup" => Self::Lookup,
      "report" => Self::Report,
      other => Self::Other(other.to_string()),
    }
  }

  pub fn is_folder(&self) -> bool {
    matches!(self, Self::Folder)
  }
}

impl fmt::Display for ItemType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// One cached entry of the remote content tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
  pub id: NodeId,
  pub workspace: String,
  pub name: String,
  pub item_type: ItemType,
  /// Containing folder, or the root sentinel for top-level nodes.
  pub parent_id: NodeId,
  pub description: Option<String>,
  pub created_at: Option<String>,
  pub created_by: Option<String>,
  pub modified_at: Option<String>,
  pub modified_by: Option<String>,
  pub permissions: Vec<String>,
  /// Hint from the last remote fetch: the remote side reported children,
  /// whether or not they are cached yet. Always false for non-folders.
  pub has_children: bool,
  /// True only if this node's immediate children have been fetched and
  /// written since the flag was last cleared.
  pub children_fetched: bool,
  /// Last successful write of this node's own record.
  pub last_fetched: DateTime<Utc>,
}

impl ContentNode {
  pub fn is_folder(&self) -> bool {
    self.item_type.is_folder()
  }
}

/// Normalized result of one remote listing fetch: the node's own metadata
/// plus its immediate children, ready to commit to the store.
#[derive(Debug, Clone)]
pub struct Listing {
  pub node: ContentNode,
  pub children: Vec<ContentNode>,
  /// The raw remote payload, persisted to the blob store for display/export.
  pub raw: serde_json::Value,
}

/// Aggregate cache statistics for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
  pub total_items: u64,
  pub counts_by_type: BTreeMap<String, u64>,
  pub oldest_last_fetched: Option<DateTime<Utc>>,
  pub newest_last_fetched: Option<DateTime<Utc>>,
}

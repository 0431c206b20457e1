//! Remote tree source boundary.
//!
//! The remote side serves two payload shapes: a regular folder listing, and
//! an "export" shape for the handful of well-known top-level virtual folders
//! (children under a category-specific field). Both are normalized into one
//! canonical `Listing` here, before anything touches the cache.

mod api_types;
mod client;

pub(crate) use api_types::{normalize_folder, normalize_special};
pub use client::HttpTreeSource;

use std::future::Future;
use thiserror::Error;

use crate::cache::{Listing, NodeId};

/// Remote fetch failure. All variants are recoverable from the cache's point
/// of view: the engine reports them to the caller (or counts them during a
/// recursive walk) and never silently retries.
#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("remote content not found: {0}")]
  NotFound(String),

  #[error("permission denied by remote: {0}")]
  PermissionDenied(String),

  #[error("transport error: {0}")]
  Transport(String),
}

impl From<reqwest::Error> for RemoteError {
  fn from(e: reqwest::Error) -> Self {
    Self::Transport(e.to_string())
  }
}

/// Source of truth for the content tree. Supplies, for a node id, that
/// node's own metadata plus its immediate children, already normalized.
///
/// The synchronization engine is generic over this trait; tests script it
/// with an in-memory implementation.
pub trait TreeSource: Send + Sync {
  /// Fetch the listing for a folder (or special root) by id.
  fn fetch_listing(
    &self,
    workspace: &str,
    id: &NodeId,
  ) -> impl Future<Output = Result<Listing, RemoteError>> + Send;

  /// Fetch the raw export payload of a non-folder item.
  fn fetch_item(
    &self,
    id: &NodeId,
  ) -> impl Future<Output = Result<serde_json::Value, RemoteError>> + Send;
}

/// The well-known top-level virtual folders. Each is addressed by a reserved
/// id adjacent to the root sentinel, so the rest of the system treats them
/// as ordinary folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialRoot {
  Personal,
  Global,
  AdminRecommended,
  InstalledApps,
}

impl SpecialRoot {
  pub const ALL: [SpecialRoot; 4] = [
    Self::Personal,
    Self::Global,
    Self::AdminRecommended,
    Self::InstalledApps,
  ];

  /// Endpoint path segment for the export endpoint.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Personal => "personal",
      Self::Global => "global",
      Self::AdminRecommended => "adminRecommended",
      Self::InstalledApps => "installedApps",
    }
  }

  /// Display name used when the export payload carries none.
  pub fn display_name(&self) -> &'static str {
    match self {
      Self::Personal => "Personal",
      Self::Global => "Global",
      Self::AdminRecommended => "Admin Recommended",
      Self::InstalledApps => "Installed Apps",
    }
  }

  /// Reserved id for this virtual folder.
  pub fn well_known_id(&self) -> NodeId {
    let id = match self {
      Self::Personal => "0000000000000001",
      Self::Global => "0000000000000002",
      Self::AdminRecommended => "0000000000000003",
      Self::InstalledApps => "0000000000000004",
    };
    NodeId::from_trusted(id.to_string())
  }

  pub fn from_id(id: &NodeId) -> Option<Self> {
    Self::ALL.iter().copied().find(|r| r.well_known_id() == *id)
  }

  /// Parse a user-facing category name, e.g. from the CLI.
  pub fn from_name(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "personal" => Some(Self::Personal),
      "global" => Some(Self::Global),
      "admin" | "adminrecommended" | "admin-recommended" => Some(Self::AdminRecommended),
      "apps" | "installedapps" | "installed-apps" => Some(Self::InstalledApps),
      _ => None,
    }
  }
}

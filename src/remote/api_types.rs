//! Serde-deserializable types matching remote API responses.
//!
//! These types are separate from the cached domain types to allow clean
//! deserialization while keeping `ContentNode` focused on what the cache
//! needs. Normalization stamps the workspace and parent linkage here, so the
//! engine and store only ever see one canonical `Listing` shape.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, SpecialRoot};
use crate::cache::{ContentNode, ItemType, Listing, NodeId};

/// One node as the remote side describes it. Folder listings nest one level
/// of `children`; occasionally the remote also nests grandchildren, which
/// are used only as `has_children` evidence and are not cached.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNode {
  pub id: String,
  pub name: String,
  pub item_type: String,
  pub parent_id: Option<String>,
  pub description: Option<String>,
  pub created_at: Option<String>,
  pub created_by: Option<String>,
  pub modified_at: Option<String>,
  pub modified_by: Option<String>,
  #[serde(default)]
  pub permissions: Vec<String>,
  pub has_children: Option<bool>,
  #[serde(default)]
  pub children: Vec<ApiNode>,
}

/// Export payload for a well-known root category. Same node metadata, but
/// children arrive under `entries`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpecialRootExport {
  pub name: Option<String>,
  pub description: Option<String>,
  pub created_at: Option<String>,
  pub created_by: Option<String>,
  pub modified_at: Option<String>,
  pub modified_by: Option<String>,
  #[serde(default)]
  pub permissions: Vec<String>,
  #[serde(default)]
  pub entries: Vec<ApiNode>,
}

/// Normalize a regular folder response into a `Listing`.
pub fn normalize_folder(workspace: &str, raw: Value) -> Result<Listing, RemoteError> {
  let api: ApiNode = serde_json::from_value(raw.clone()).map_err(malformed)?;

  let id = parse_id(&api.id)?;
  let parent_id = match &api.parent_id {
    Some(p) => parse_id(p)?,
    None => NodeId::root(),
  };

  let children = normalize_children(workspace, &id, &api.children)?;

  let mut node = node_from_api(workspace, &api, id, parent_id);
  node.item_type = ItemType::Folder;
  node.has_children = !children.is_empty() || api.has_children.unwrap_or(false);

  Ok(Listing {
    node,
    children,
    raw,
  })
}

/// Normalize a special-root export response into a `Listing`. The virtual
/// folder itself gets the category's reserved id and the root sentinel as
/// its parent.
pub fn normalize_special(
  workspace: &str,
  category: SpecialRoot,
  raw: Value,
) -> Result<Listing, RemoteError> {
  let api: ApiSpecialRootExport = serde_json::from_value(raw.clone()).map_err(malformed)?;

  let id = category.well_known_id();
  let children = normalize_children(workspace, &id, &api.entries)?;

  let node = ContentNode {
    id: id.clone(),
    workspace: workspace.to_string(),
    name: api
      .name
      .unwrap_or_else(|| category.display_name().to_string()),
    item_type: ItemType::Folder,
    parent_id: NodeId::root(),
    description: api.description,
    created_at: api.created_at,
    created_by: api.created_by,
    modified_at: api.modified_at,
    modified_by: api.modified_by,
    permissions: api.permissions,
    has_children: !children.is_empty(),
    children_fetched: false,
    last_fetched: Utc::now(),
  };

  Ok(Listing {
    node,
    children,
    raw,
  })
}

fn normalize_children(
  workspace: &str,
  parent: &NodeId,
  children: &[ApiNode],
) -> Result<Vec<ContentNode>, RemoteError> {
  children
    .iter()
    .map(|api| {
      let id = parse_id(&api.id)?;
      let mut node = node_from_api(workspace, api, id, parent.clone());
      // Non-folders never have children. For folders the remote hint wins
      // when present; otherwise assume expandable, and nested grandchildren
      // are direct evidence either way.
      node.has_children = node.item_type.is_folder()
        && (api.has_children.unwrap_or(true) || !api.children.is_empty());
      Ok(node)
    })
    .collect()
}

fn node_from_api(
  workspace: &str,
  api: &ApiNode,
  id: NodeId,
  parent_id: NodeId,
) -> ContentNode {
  ContentNode {
    id,
    workspace: workspace.to_string(),
    name: api.name.clone(),
    item_type: ItemType::from_tag(&api.item_type),
    parent_id,
    description: api.description.clone(),
    created_at: api.created_at.clone(),
    created_by: api.created_by.clone(),
    modified_at: api.modified_at.clone(),
    modified_by: api.modified_by.clone(),
    permissions: api.permissions.clone(),
    has_children: false,
    children_fetched: false,
    last_fetched: Utc::now(),
  }
}

fn parse_id(s: &str) -> Result<NodeId, RemoteError> {
  NodeId::parse(s).map_err(|_| malformed_msg(format!("bad node id {s:?}")))
}

fn malformed(e: serde_json::Error) -> RemoteError {
  malformed_msg(e.to_string())
}

fn malformed_msg(msg: String) -> RemoteError {
  RemoteError::Transport(format!("malformed remote payload: {msg}"))
}

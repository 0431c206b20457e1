//! SQLite-backed persistent store for cached content tree nodes.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use super::node::{CacheStats, ContentNode, ItemType, Listing, NodeId};
use super::StoreError;
use crate::db::Database;

/// Maximum upward hops when reconstructing a path. The remote tree is
/// expected to be acyclic; this bound keeps corrupted data from looping
/// the walk forever.
const MAX_PATH_DEPTH: usize = 64;

/// Durable CRUD over `ContentNode` plus indexed lookups by parent and type.
///
/// All multi-row mutations run inside a single transaction, so concurrent
/// readers never observe an intermediate state.
#[derive(Clone)]
pub struct NodeStore {
  db: Arc<Database>,
}

impl NodeStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Insert-or-replace one node by `(workspace, id)`. Last write wins.
  pub fn upsert(&self, node: &ContentNode) -> Result<(), StoreError> {
    let conn = self.db.lock()?;
    upsert_in(&conn, node)?;
    Ok(())
  }

  /// Insert-or-replace a batch of nodes. All-or-nothing: the batch is one
  /// transaction.
  pub fn upsert_batch(&self, nodes: &[ContentNode]) -> Result<(), StoreError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;
    for node in nodes {
      upsert_in(&tx, node)?;
    }
    tx.commit()?;
    Ok(())
  }

  /// Commit one expand result: upsert the listed node with
  /// `children_fetched = true`, upsert all of its children, one transaction.
  /// A reader never sees the children without the parent's flag, or vice
  /// versa.
  pub fn apply_listing(&self, listing: &Listing) -> Result<(), StoreError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    let mut parent = listing.node.clone();
    parent.children_fetched = true;
    parent.last_fetched = Utc::now();
    upsert_in(&tx, &parent)?;

    for child in &listing.children {
      upsert_in(&tx, child)?;
    }

    tx.commit()?;
    Ok(())
  }

  /// Get a node, or `None` if it is not cached.
  pub fn get(&self, workspace: &str, id: &NodeId) -> Result<Option<ContentNode>, StoreError> {
    let conn = self.db.lock()?;
    get_in(&conn, workspace, id)
  }

  /// Immediate children of a node, Folders first, then all other types,
  /// each group ascending by name. Name comparison is byte-wise
  /// (SQLite BINARY collation), so it is case-sensitive and stable.
  pub fn children(
    &self,
    workspace: &str,
    parent_id: &NodeId,
  ) -> Result<Vec<ContentNode>, StoreError> {
    let conn = self.db.lock()?;
    children_in(&conn, workspace, parent_id)
  }

  /// Children of the root sentinel: the cached top-level folders.
  pub fn top_level(&self, workspace: &str) -> Result<Vec<ContentNode>, StoreError> {
    self.children(workspace, &NodeId::root())
  }

  /// Set or clear the `children_fetched` flag, refreshing `last_fetched`.
  /// Clearing is shallow: already-cached children stay in place.
  pub fn mark_children_fetched(
    &self,
    workspace: &str,
    id: &NodeId,
    value: bool,
  ) -> Result<(), StoreError> {
    let conn = self.db.lock()?;
    conn.execute(
      "UPDATE content_nodes SET children_fetched = ?, last_fetched = ?
       WHERE workspace = ? AND id = ?",
      params![value, format_ts(Utc::now()), workspace, id.as_str()],
    )?;
    Ok(())
  }

  /// True if the node is not cached, or its own record is at least
  /// `max_age` old (so `max_age == 0` means "always stale").
  pub fn is_stale(
    &self,
    workspace: &str,
    id: &NodeId,
    max_age: Duration,
  ) -> Result<bool, StoreError> {
    match self.get(workspace, id)? {
      Some(node) => Ok(Utc::now() - node.last_fetched >= max_age),
      None => Ok(true),
    }
  }

  /// Breadcrumb names from the top of the tree down to `id` inclusive,
  /// excluding the root sentinel.
  ///
  /// If the `parent_id` chain hits a node that is not cached yet, the
  /// partial path accumulated so far is returned (the ancestor simply has
  /// not been fetched). A depth bound tolerates corrupted parent chains.
  pub fn path(&self, workspace: &str, id: &NodeId) -> Result<Vec<String>, StoreError> {
    let conn = self.db.lock()?;

    let mut names = Vec::new();
    let mut current = id.clone();

    for hop in 0.. {
      if hop >= MAX_PATH_DEPTH {
        warn!(workspace, id = %id, "path walk exceeded depth bound, returning partial path");
        break;
      }
      let Some(node) = get_in(&conn, workspace, &current)? else {
        // Dangling ancestor: cached as a child, never fetched itself.
        break;
      };
      names.push(node.name);
      if node.parent_id.is_root() {
        break;
      }
      current = node.parent_id;
    }

    names.reverse();
    Ok(names)
  }

  /// Case-insensitive substring search over node names. The substring is
  /// matched literally: `%` and `_` are not wildcards.
  pub fn search_by_name(
    &self,
    workspace: &str,
    substring: &str,
    limit: usize,
  ) -> Result<Vec<ContentNode>, StoreError> {
    let escaped = substring
      .replace('\\', "\\\\")
      .replace('%', "\\%")
      .replace('_', "\\_");
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT * FROM content_nodes
       WHERE workspace = ? AND name LIKE '%' || ? || '%' ESCAPE '\\'
       ORDER BY name, id
       LIMIT ?",
    )?;
    let nodes = stmt
      .query_map(params![workspace, escaped, limit as i64], node_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
  }

  /// All cached nodes of one type, ascending by name.
  pub fn by_type(
    &self,
    workspace: &str,
    item_type: &ItemType,
  ) -> Result<Vec<ContentNode>, StoreError> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT * FROM content_nodes
       WHERE workspace = ? AND item_type = ?
       ORDER BY name, id",
    )?;
    let nodes = stmt
      .query_map(params![workspace, item_type.as_str()], node_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
  }

  /// Delete a node and every transitive descendant, atomically. Sibling
  /// subtrees are untouched. Returns the ids of the deleted nodes so the
  /// caller can clean up associated blobs.
  pub fn delete_cascade(&self, workspace: &str, id: &NodeId) -> Result<Vec<NodeId>, StoreError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    // Pre-order walk collecting the doomed subtree. The visited set keeps
    // corrupted parent cycles from looping the walk.
    let mut doomed: Vec<NodeId> = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![id.clone()];
    while let Some(current) = stack.pop() {
      if !visited.insert(current.clone()) {
        continue;
      }
      for child in children_in(&tx, workspace, &current)? {
        stack.push(child.id);
      }
      doomed.push(current);
    }

    let mut deleted = Vec::new();
    for node_id in doomed {
      let n = tx.execute(
        "DELETE FROM content_nodes WHERE workspace = ? AND id = ?",
        params![workspace, node_id.as_str()],
      )?;
      if n > 0 {
        deleted.push(node_id);
      }
    }

    tx.commit()?;
    Ok(deleted)
  }

  /// Aggregate statistics for one workspace.
  pub fn stats(&self, workspace: &str) -> Result<CacheStats, StoreError> {
    let conn = self.db.lock()?;

    let (total_items, oldest, newest): (u64, Option<String>, Option<String>) = conn.query_row(
      "SELECT COUNT(*), MIN(last_fetched), MAX(last_fetched)
       FROM content_nodes WHERE workspace = ?",
      params![workspace],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut stmt = conn.prepare(
      "SELECT item_type, COUNT(*) FROM content_nodes
       WHERE workspace = ? GROUP BY item_type",
    )?;
    let counts_by_type = stmt
      .query_map(params![workspace], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
      })?
      .collect::<rusqlite::Result<_>>()?;

    Ok(CacheStats {
      total_items,
      counts_by_type,
      oldest_last_fetched: oldest.as_deref().map(parse_ts).transpose()?,
      newest_last_fetched: newest.as_deref().map(parse_ts).transpose()?,
    })
  }
}

fn upsert_in(conn: &Connection, node: &ContentNode) -> Result<(), StoreError> {
  let permissions = serde_json::to_string(&node.permissions)?;
  conn.execute(
    "INSERT OR REPLACE INTO content_nodes
       (workspace, id, name, item_type, parent_id, description,
        created_at, created_by, modified_at, modified_by, permissions,
        has_children, children_fetched, last_fetched)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      node.workspace,
      node.id.as_str(),
      node.name,
      node.item_type.as_str(),
      node.parent_id.as_str(),
      node.description,
      node.created_at,
      node.created_by,
      node.modified_at,
      node.modified_by,
      permissions,
      node.has_children,
      node.children_fetched,
      format_ts(node.last_fetched),
    ],
  )?;
  Ok(())
}

fn get_in(
  conn: &Connection,
  workspace: &str,
  id: &NodeId,
) -> Result<Option<ContentNode>, StoreError> {
  let mut stmt =
    conn.prepare("SELECT * FROM content_nodes WHERE workspace = ? AND id = ?")?;
  match stmt.query_row(params![workspace, id.as_str()], node_from_row) {
    Ok(node) => Ok(Some(node)),
    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
    Err(e) => Err(e.into()),
  }
}

fn children_in(
  conn: &Connection,
  workspace: &str,
  parent_id: &NodeId,
) -> Result<Vec<ContentNode>, StoreError> {
  let mut stmt = conn.prepare(
    "SELECT * FROM content_nodes
     WHERE workspace = ? AND parent_id = ?
     ORDER BY CASE WHEN item_type = 'folder' THEN 0 ELSE 1 END, name, id",
  )?;
  let nodes = stmt
    .query_map(params![workspace, parent_id.as_str()], node_from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(nodes)
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<ContentNode> {
  let permissions: String = row.get("permissions")?;
  let permissions: Vec<String> = serde_json::from_str(&permissions)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
  let last_fetched: String = row.get("last_fetched")?;

  Ok(ContentNode {
    workspace: row.get("workspace")?,
    id: NodeId::from_trusted(row.get("id")?),
    name: row.get("name")?,
    item_type: ItemType::from_tag(&row.get::<_, String>("item_type")?),
    parent_id: NodeId::from_trusted(row.get("parent_id")?),
    description: row.get("description")?,
    created_at: row.get("created_at")?,
    created_by: row.get("created_by")?,
    modified_at: row.get("modified_at")?,
    modified_by: row.get("modified_by")?,
    permissions,
    has_children: row.get("has_children")?,
    children_fetched: row.get("children_fetched")?,
    last_fetched: parse_ts(&last_fetched)
      .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e)))?,
  })
}

fn format_ts(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
  DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

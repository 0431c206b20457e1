//! Lazy expansion and recursive crawl over the cached content tree.

use futures::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::SyncError;
use crate::cache::{BlobStore, ContentNode, Listing, NodeId, NodeStore};
use crate::remote::{RemoteError, SpecialRoot, TreeSource};

/// Options for a recursive subtree synchronization.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Maximum walk depth below the starting folder. Doubles as the guard
  /// against corrupted parent chains.
  pub max_depth: usize,
  /// Re-fetch folders whose children are already cached. When false the
  /// walk trusts `children_fetched` and only fetches what is missing, which
  /// makes interrupted syncs resumable.
  pub refresh: bool,
  /// Upper bound on concurrent in-flight fetches. `1` is a strict
  /// sequential depth-first walk; higher values fetch sibling batches
  /// concurrently while committing results in a deterministic order.
  pub concurrency: usize,
  /// Cooperative cancellation, checked before each batch of folders.
  /// In-flight fetches complete and their results are kept.
  pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      max_depth: 64,
      refresh: false,
      concurrency: 1,
      cancel: None,
    }
  }
}

impl SyncOptions {
  fn cancelled(&self) -> bool {
    self
      .cancel
      .as_ref()
      .is_some_and(|c| c.load(Ordering::Relaxed))
  }
}

/// Aggregate result of a recursive synchronization. The walk never aborts
/// on a per-node remote failure; callers decide what "success" means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
  /// Folders fetched from the remote source and committed.
  pub folders_fetched: u64,
  /// Non-folder items cached while committing folder listings.
  pub items_fetched: u64,
  /// Folders that failed to fetch; each failure skipped its subtree.
  pub errors: u64,
}

/// Result of visiting one folder during the walk.
enum Visit {
  /// Children already cached and trusted, no fetch performed.
  Cached(Vec<ContentNode>),
  Fetched(Result<Listing, RemoteError>),
}

/// The synchronization engine. Owns handles to the node and blob stores and
/// a remote source; one instance per connection profile, no global state.
pub struct SyncEngine<S: TreeSource> {
  source: S,
  store: NodeStore,
  blobs: BlobStore,
}

impl<S: TreeSource> SyncEngine<S> {
  pub fn new(source: S, store: NodeStore, blobs: BlobStore) -> Self {
    Self {
      source,
      store,
      blobs,
    }
  }

  /// Lazily expand one folder: cached children if the node's
  /// `children_fetched` flag is set, otherwise one remote fetch committed
  /// as a single unit (raw payload to the blob store, then node + children
  /// + flag in one transaction).
  ///
  /// On failure the cache is left untouched and the typed error is
  /// surfaced; the engine never retries on its own.
  pub async fn expand(
    &self,
    workspace: &str,
    id: &NodeId,
  ) -> Result<Vec<ContentNode>, SyncError> {
    if let Some(node) = self.store.get(workspace, id)? {
      if node.children_fetched {
        debug!(workspace, id = %id, "expand: cache hit");
        return Ok(self.store.children(workspace, id)?);
      }
    }
    self.fetch_and_commit(workspace, id).await?;
    Ok(self.store.children(workspace, id)?)
  }

  /// Expand the well-known top-level virtual folders and return the cached
  /// top level. A category the remote denies or does not serve is skipped
  /// with a warning; only storage failures propagate.
  pub async fn expand_top_level(
    &self,
    workspace: &str,
  ) -> Result<Vec<ContentNode>, SyncError> {
    for category in SpecialRoot::ALL {
      match self.expand(workspace, &category.well_known_id()).await {
        Ok(_) => {}
        Err(SyncError::Remote(e)) => {
          warn!(workspace, category = category.as_str(), error = %e, "skipping root category");
        }
        Err(e @ SyncError::Storage(_)) => return Err(e),
      }
    }
    Ok(self.store.top_level(workspace)?)
  }

  /// Depth-first crawl of the subtree rooted at `root`.
  ///
  /// Each folder is visited exactly as in `expand` (so folders already
  /// marked `children_fetched` are not re-fetched unless `opts.refresh`).
  /// A remote failure for one folder increments `errors` and skips that
  /// subtree; the walk continues with its siblings. `on_progress` fires
  /// once per folder before its fetch, purely for observability.
  ///
  /// Visit order is deterministic: children are walked in the same
  /// Folders-first alphabetical order as `NodeStore::children`.
  pub async fn sync_recursive(
    &self,
    workspace: &str,
    root: &NodeId,
    opts: &SyncOptions,
    mut on_progress: impl FnMut(&NodeId),
  ) -> Result<SyncOutcome, SyncError> {
    let concurrency = opts.concurrency.max(1);
    let mut outcome = SyncOutcome::default();
    let mut stack: Vec<(NodeId, usize)> = vec![(root.clone(), 0)];

    while !stack.is_empty() {
      if opts.cancelled() {
        info!(workspace, "sync cancelled, stopping before next folder");
        break;
      }

      // Plan the next batch: up to `concurrency` folders off the stack.
      let mut plans: Vec<(NodeId, usize, Option<Vec<ContentNode>>)> = Vec::new();
      for _ in 0..concurrency {
        let Some((id, depth)) = stack.pop() else { break };
        on_progress(&id);
        let cached = if opts.refresh {
          None
        } else {
          match self.store.get(workspace, &id)? {
            Some(node) if node.children_fetched => {
              Some(self.store.children(workspace, &id)?)
            }
            _ => None,
          }
        };
        plans.push((id, depth, cached));
      }

      // Fetch the batch concurrently; cached entries resolve immediately.
      // `join_all` preserves plan order, which keeps the walk deterministic.
      let visits = join_all(plans.into_iter().map(|(id, depth, cached)| {
        let source = &self.source;
        async move {
          let visit = match cached {
            Some(children) => Visit::Cached(children),
            None => Visit::Fetched(source.fetch_listing(workspace, &id).await),
          };
          (id, depth, visit)
        }
      }))
      .await;

      // Commit in batch order, collecting discovered subfolders.
      let mut discovered: Vec<(NodeId, usize)> = Vec::new();
      for (id, depth, visit) in visits {
        let children = match visit {
          Visit::Cached(children) => {
            debug!(workspace, id = %id, "sync: cache hit");
            children
          }
          Visit::Fetched(Ok(listing)) => {
            self.commit_listing(workspace, &listing)?;
            outcome.folders_fetched += 1;
            outcome.items_fetched +=
              listing.children.iter().filter(|c| !c.is_folder()).count() as u64;
            self.store.children(workspace, &id)?
          }
          Visit::Fetched(Err(e)) => {
            warn!(workspace, id = %id, error = %e, "sync: folder fetch failed, skipping subtree");
            outcome.errors += 1;
            continue;
          }
        };

        if depth < opts.max_depth {
          for child in children.iter().filter(|c| c.is_folder()) {
            discovered.push((child.id.clone(), depth + 1));
          }
        }
      }

      // LIFO stack: reverse so the first discovered folder is walked next.
      for entry in discovered.into_iter().rev() {
        stack.push(entry);
      }
    }

    info!(
      workspace,
      root = %root,
      folders = outcome.folders_fetched,
      items = outcome.items_fetched,
      errors = outcome.errors,
      "sync finished"
    );
    Ok(outcome)
  }

  /// Clear `children_fetched` for exactly this node. Intentionally shallow:
  /// already-cached descendants keep their own flags, so only this folder
  /// is re-fetched on the next expand.
  pub fn invalidate(&self, workspace: &str, id: &NodeId) -> Result<(), SyncError> {
    self.store.mark_children_fetched(workspace, id, false)?;
    Ok(())
  }

  /// Evict a node and its entire subtree from the cache, including blobs.
  pub fn evict(&self, workspace: &str, id: &NodeId) -> Result<usize, SyncError> {
    let deleted = self.store.delete_cascade(workspace, id)?;
    for node_id in &deleted {
      self.blobs.remove(workspace, node_id)?;
    }
    Ok(deleted.len())
  }

  /// Raw export payload of an item: the cached blob when present, otherwise
  /// one remote fetch whose result is saved for next time.
  pub async fn export_item(&self, workspace: &str, id: &NodeId) -> Result<Value, SyncError> {
    if let Some(payload) = self.blobs.load(workspace, id)? {
      debug!(workspace, id = %id, "export: blob cache hit");
      return Ok(payload);
    }
    let payload = self.source.fetch_item(id).await?;
    self.blobs.save(workspace, id, &payload)?;
    Ok(payload)
  }

  async fn fetch_and_commit(&self, workspace: &str, id: &NodeId) -> Result<Listing, SyncError> {
    let listing = self.source.fetch_listing(workspace, id).await?;
    self.commit_listing(workspace, &listing)?;
    Ok(listing)
  }

  /// Commit one listing: blob first (a failure must leave the tree state
  /// untouched), then node + children + flag in a single transaction.
  fn commit_listing(&self, workspace: &str, listing: &Listing) -> Result<(), SyncError> {
    self.blobs.save(workspace, &listing.node.id, &listing.raw)?;
    self.store.apply_listing(listing)?;
    debug!(
      workspace,
      id = %listing.node.id,
      children = listing.children.len(),
      "committed listing"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::remote::{normalize_folder, normalize_special};
  use serde_json::json;
  use std::collections::{HashMap, HashSet};
  use std::sync::Mutex;

  /// Scripted in-memory tree source: raw payloads keyed by id, a set of ids
  /// that fail with an injected error, and a shared fetch log.
  struct MockSource {
    listings: HashMap<NodeId, Value>,
    items: HashMap<NodeId, Value>,
    fail: HashSet<NodeId>,
    log: Arc<Mutex<Vec<NodeId>>>,
  }

  impl TreeSource for MockSource {
    async fn fetch_listing(&self, workspace: &str, id: &NodeId) -> Result<Listing, RemoteError> {
      self.log.lock().unwrap().push(id.clone());
      if self.fail.contains(id) {
        return Err(RemoteError::Transport("injected failure".to_string()));
      }
      let raw = self
        .listings
        .get(id)
        .ok_or_else(|| RemoteError::NotFound(id.to_string()))?
        .clone();
      match SpecialRoot::from_id(id) {
        Some(category) => normalize_special(workspace, category, raw),
        None => normalize_folder(workspace, raw),
      }
    }

    async fn fetch_item(&self, id: &NodeId) -> Result<Value, RemoteError> {
      self.log.lock().unwrap().push(id.clone());
      self
        .items
        .get(id)
        .cloned()
        .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
  }

  struct Fixture {
    engine: SyncEngine<MockSource>,
    store: NodeStore,
    log: Arc<Mutex<Vec<NodeId>>>,
    _blob_dir: tempfile::TempDir,
  }

  impl Fixture {
    fn fetch_count(&self) -> usize {
      self.log.lock().unwrap().len()
    }

    fn fetched_ids(&self) -> Vec<String> {
      self
        .log
        .lock()
        .unwrap()
        .iter()
        .map(|id| id.to_string())
        .collect()
    }
  }

  fn id(s: &str) -> NodeId {
    NodeId::parse(s).unwrap()
  }

  fn fixture(listings: &[(&str, Value)], fail: &[&str]) -> Fixture {
    let blob_dir = tempfile::tempdir().unwrap();
    let store = NodeStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let source = MockSource {
      listings: listings.iter().map(|(k, v)| (id(k), v.clone())).collect(),
      items: HashMap::new(),
      fail: fail.iter().map(|k| id(k)).collect(),
      log: Arc::clone(&log),
    };
    let engine = SyncEngine::new(source, store.clone(), BlobStore::new(blob_dir.path()));
    Fixture {
      engine,
      store,
      log,
      _blob_dir: blob_dir,
    }
  }

  fn child(id: &str, name: &str, item_type: &str) -> Value {
    json!({"id": id, "name": name, "itemType": item_type})
  }

  fn folder(id: &str, name: &str, parent: Option<&str>, children: Vec<Value>) -> (String, Value) {
    let mut payload = json!({
      "id": id,
      "name": name,
      "itemType": "Folder",
      "children": children,
    });
    if let Some(p) = parent {
      payload["parentId"] = json!(p);
    }
    (id.to_string(), payload)
  }

  // Root 0a has subfolders Alpha (a0 -> aa) and Beta (b0 -> bb) plus one
  // dashboard d1.
  fn sample_tree() -> Vec<(String, Value)> {
    vec![
      folder("0a", "Root", None, vec![
        child("a0", "Alpha", "Folder"),
        child("b0", "Beta", "Folder"),
        child("d1", "Sales", "Dashboard"),
      ]),
      folder("a0", "Alpha", Some("0a"), vec![child("aa", "Deep", "Folder")]),
      folder("aa", "Deep", Some("a0"), vec![]),
      folder("b0", "Beta", Some("0a"), vec![child("bb", "Deeper", "Folder")]),
      folder("bb", "Deeper", Some("b0"), vec![]),
    ]
  }

  fn borrowed(tree: &[(String, Value)]) -> Vec<(&str, Value)> {
    tree.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
  }

  #[tokio::test]
  async fn expand_is_idempotent_with_zero_network_on_hit() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let first = f.engine.expand("ws", &id("0a")).await.unwrap();
    assert_eq!(f.fetch_count(), 1);

    let second = f.engine.expand("ws", &id("0a")).await.unwrap();
    assert_eq!(f.fetch_count(), 1, "second expand must not hit the network");
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn expand_orders_children_folders_first() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let children = f.engine.expand("ws", &id("0a")).await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Beta", "Sales"]);

    let root = f.store.get("ws", &id("0a")).unwrap().unwrap();
    assert!(root.children_fetched);
    assert!(children.iter().all(|c| !c.children_fetched));
  }

  #[tokio::test]
  async fn expand_scenario_breadcrumbs() {
    // Personal (special root) -> [Reports (folder), Sales (dashboard)].
    let personal = SpecialRoot::Personal.well_known_id();
    let export = json!({
      "name": "Personal",
      "entries": [
        child("f1", "Reports", "Folder"),
        child("d1", "Sales", "Dashboard"),
      ]
    });
    let f = fixture(&[(personal.as_str(), export)], &[]);

    let children = f.engine.expand("ws", &personal).await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Reports", "Sales"]);

    assert!(f.store.get("ws", &personal).unwrap().unwrap().children_fetched);
    assert!(!f.store.get("ws", &id("f1")).unwrap().unwrap().children_fetched);
    assert_eq!(
      f.store.path("ws", &id("d1")).unwrap(),
      ["Personal", "Sales"]
    );
  }

  #[tokio::test]
  async fn expand_remote_failure_leaves_cache_untouched() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &["0a"]);

    let err = f.engine.expand("ws", &id("0a")).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Transport(_))));
    assert!(f.store.get("ws", &id("0a")).unwrap().is_none());
    assert!(f.store.children("ws", &id("0a")).unwrap().is_empty());
  }

  #[tokio::test]
  async fn expand_not_found_and_permission_denied_are_distinguishable() {
    let f = fixture(&[], &[]);
    let err = f.engine.expand("ws", &id("0a")).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::NotFound(_))));
  }

  #[tokio::test]
  async fn expand_storage_failure_before_commit_leaves_tree_untouched() {
    // Point the blob store at a regular file: the blob write fails after
    // the fetch but before the database commit.
    let tree = sample_tree();
    let dir = tempfile::tempdir().unwrap();
    let blob_root = dir.path().join("blobs");
    std::fs::write(&blob_root, b"not a directory").unwrap();

    let store = NodeStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let log = Arc::new(Mutex::new(Vec::new()));
    let source = MockSource {
      listings: tree.iter().map(|(k, v)| (id(k), v.clone())).collect(),
      items: HashMap::new(),
      fail: HashSet::new(),
      log,
    };
    let engine = SyncEngine::new(source, store.clone(), BlobStore::new(&blob_root));

    let err = engine.expand("ws", &id("0a")).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));

    // Forced failure mid-expand: flag not set, no children visible.
    assert!(store.get("ws", &id("0a")).unwrap().is_none());
    assert!(store.children("ws", &id("0a")).unwrap().is_empty());
  }

  #[tokio::test]
  async fn sync_walks_depth_first_in_child_order() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();

    assert_eq!(outcome.folders_fetched, 5);
    assert_eq!(outcome.items_fetched, 1);
    assert_eq!(outcome.errors, 0);
    // Alpha's subtree before Beta's.
    assert_eq!(f.fetched_ids(), ["0a", "a0", "aa", "b0", "bb"]);
  }

  #[tokio::test]
  async fn sync_counts_partial_failures_and_skips_failed_subtrees() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &["b0"]);

    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();

    // 1 of 5 folders fails: its subtree is skipped, nothing aborts.
    assert_eq!(outcome.errors, 1);
    assert_eq!(outcome.folders_fetched, 3);
    assert!(!f.fetched_ids().contains(&"bb".to_string()));
    assert!(f.store.get("ws", &id("bb")).unwrap().is_none());

    for ok in ["0a", "a0", "aa"] {
      assert!(f.store.get("ws", &id(ok)).unwrap().unwrap().children_fetched);
    }
    // The failed folder stays cached as a child, but untrusted.
    assert!(!f.store.get("ws", &id("b0")).unwrap().unwrap().children_fetched);
  }

  #[tokio::test]
  async fn sync_one_leaf_failure_leaves_other_folders_trusted() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &["bb"]);

    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();

    assert_eq!(outcome.errors, 1);
    assert_eq!(outcome.folders_fetched, 4);
    for ok in ["0a", "a0", "aa", "b0"] {
      assert!(f.store.get("ws", &id(ok)).unwrap().unwrap().children_fetched);
    }
  }

  #[tokio::test]
  async fn sync_reuses_already_expanded_folders() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    f.engine.expand("ws", &id("0a")).await.unwrap();
    f.log.lock().unwrap().clear();

    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();

    // Root was already trusted; only the rest of the tree is fetched.
    assert_eq!(outcome.folders_fetched, 4);
    assert_eq!(f.fetched_ids(), ["a0", "aa", "b0", "bb"]);
  }

  #[tokio::test]
  async fn sync_refresh_refetches_trusted_folders() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    f.engine.expand("ws", &id("0a")).await.unwrap();
    f.log.lock().unwrap().clear();

    let opts = SyncOptions {
      refresh: true,
      ..SyncOptions::default()
    };
    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &opts, |_| {})
      .await
      .unwrap();
    assert_eq!(outcome.folders_fetched, 5);
  }

  #[tokio::test]
  async fn sync_respects_max_depth() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let opts = SyncOptions {
      max_depth: 1,
      ..SyncOptions::default()
    };
    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &opts, |_| {})
      .await
      .unwrap();

    // Root plus its immediate subfolders; nothing deeper.
    assert_eq!(outcome.folders_fetched, 3);
    assert_eq!(f.fetched_ids(), ["0a", "a0", "b0"]);
  }

  #[tokio::test]
  async fn sync_bounded_concurrency_same_results() {
    let tree = sample_tree();
    let sequential = fixture(&borrowed(&tree), &["b0"]);
    let concurrent = fixture(&borrowed(&tree), &["b0"]);

    let a = sequential
      .engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();
    let opts = SyncOptions {
      concurrency: 3,
      ..SyncOptions::default()
    };
    let b = concurrent
      .engine
      .sync_recursive("ws", &id("0a"), &opts, |_| {})
      .await
      .unwrap();

    assert_eq!(a, b);
  }

  #[tokio::test]
  async fn sync_cancellation_stops_before_next_folder() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let cancel = Arc::new(AtomicBool::new(false));
    let opts = SyncOptions {
      cancel: Some(Arc::clone(&cancel)),
      ..SyncOptions::default()
    };

    let outcome = f
      .engine
      .sync_recursive("ws", &id("0a"), &opts, |_| {
        // Cancel during the first visit; its in-flight fetch still lands.
        cancel.store(true, Ordering::Relaxed);
      })
      .await
      .unwrap();

    assert_eq!(outcome.folders_fetched, 1);
    assert_eq!(f.fetched_ids(), ["0a"]);
  }

  #[tokio::test]
  async fn sync_progress_fires_once_per_folder_before_fetch() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    let mut progressed = Vec::new();
    f.engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |id| {
        progressed.push(id.to_string())
      })
      .await
      .unwrap();

    assert_eq!(progressed, ["0a", "a0", "aa", "b0", "bb"]);
  }

  #[tokio::test]
  async fn invalidate_is_shallow_and_forces_refetch() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    f.engine.expand("ws", &id("0a")).await.unwrap();
    f.engine.expand("ws", &id("a0")).await.unwrap();
    assert_eq!(f.fetch_count(), 2);

    f.engine.invalidate("ws", &id("0a")).unwrap();

    // Children are still cached while the flag is clear.
    assert_eq!(f.store.children("ws", &id("0a")).unwrap().len(), 3);
    // The invalidated folder is re-fetched; its child keeps its own flag.
    f.engine.expand("ws", &id("0a")).await.unwrap();
    assert_eq!(f.fetch_count(), 3);
  }

  #[tokio::test]
  async fn evict_removes_subtree_and_blobs() {
    let tree = sample_tree();
    let f = fixture(&borrowed(&tree), &[]);

    f.engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap();

    let evicted = f.engine.evict("ws", &id("a0")).unwrap();
    assert_eq!(evicted, 2); // a0 and aa

    assert!(f.store.get("ws", &id("a0")).unwrap().is_none());
    assert!(f.store.get("ws", &id("aa")).unwrap().is_none());
    // Sibling subtree untouched.
    assert!(f.store.get("ws", &id("b0")).unwrap().is_some());

    let node = f.store.get("ws", &id("0a")).unwrap().unwrap();
    assert!(node.children_fetched, "eviction does not touch the parent's flag");
  }

  #[tokio::test]
  async fn export_item_serves_blob_on_second_call() {
    let tree = sample_tree();
    let mut f = fixture(&borrowed(&tree), &[]);
    f.engine.source.items.insert(id("d1"), json!({"panels": []}));

    let first = f.engine.export_item("ws", &id("d1")).await.unwrap();
    assert_eq!(f.fetch_count(), 1);

    let second = f.engine.export_item("ws", &id("d1")).await.unwrap();
    assert_eq!(f.fetch_count(), 1, "second export must come from the blob store");
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn expand_top_level_skips_unavailable_categories() {
    let personal = SpecialRoot::Personal.well_known_id();
    let global = SpecialRoot::Global.well_known_id();
    let f = fixture(
      &[
        (personal.as_str(), json!({"name": "Personal", "entries": []})),
        (global.as_str(), json!({"name": "Global", "entries": []})),
        // Admin Recommended and Installed Apps are not served: NotFound.
      ],
      &[],
    );

    let top = f.engine.expand_top_level("ws").await.unwrap();
    let names: Vec<_> = top.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["Global", "Personal"]);
  }

  #[tokio::test]
  async fn sync_storage_failure_aborts_walk() {
    let tree = sample_tree();
    let dir = tempfile::tempdir().unwrap();
    let blob_root = dir.path().join("blobs");
    std::fs::write(&blob_root, b"not a directory").unwrap();

    let store = NodeStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let source = MockSource {
      listings: tree.iter().map(|(k, v)| (id(k), v.clone())).collect(),
      items: HashMap::new(),
      fail: HashSet::new(),
      log: Arc::new(Mutex::new(Vec::new())),
    };
    let engine = SyncEngine::new(source, store, BlobStore::new(&blob_root));

    let err = engine
      .sync_recursive("ws", &id("0a"), &SyncOptions::default(), |_| {})
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
  }
}

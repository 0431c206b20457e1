use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use canopy::cache::{BlobStore, ContentNode, ItemType, NodeId, NodeStore};
use canopy::config::Config;
use canopy::db::Database;
use canopy::remote::{HttpTreeSource, SpecialRoot};
use canopy::sync::{SyncEngine, SyncOptions, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(about = "Mirror a remote content library tree into a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/canopy/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Connection profile (cache workspace) to use
  #[arg(short, long)]
  profile: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List a folder's children, fetching them on first access.
  /// Without an id, lists the well-known top-level folders.
  Ls {
    /// Node id or root category (personal, global, admin, apps)
    id: Option<String>,
  },
  /// Recursively synchronize a subtree (all root categories by default)
  Sync {
    /// Node id or root category to start from
    id: Option<String>,
    /// Re-fetch folders whose children are already cached
    #[arg(long)]
    refresh: bool,
    /// Maximum walk depth
    #[arg(long)]
    max_depth: Option<usize>,
    /// Maximum concurrent in-flight fetches
    #[arg(long)]
    concurrency: Option<usize>,
  },
  /// Show the breadcrumb path of a cached node
  Path { id: String },
  /// Search cached nodes by name substring
  Search {
    term: String,
    #[arg(long, default_value_t = 25)]
    limit: usize,
  },
  /// List cached nodes of one type (folder, dashboard, search, ...)
  Types { item_type: String },
  /// Show cache statistics for the profile's workspace
  Stats,
  /// Clear one folder's children-fetched flag so the next ls re-fetches it
  Invalidate { id: String },
  /// Evict a node and its entire subtree from the cache
  Evict { id: String },
  /// Export the raw payload of an item (cached blob, or one fetch)
  Export {
    id: String,
    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
}

impl Command {
  /// Commands that may hit the network need an API token; everything else
  /// works offline against the cache.
  fn needs_network(&self) -> bool {
    matches!(self, Self::Ls { .. } | Self::Sync { .. } | Self::Export { .. })
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let profile = config.profile(args.profile.as_deref())?.clone();

  let data_dir = resolve_data_dir(&config)?;
  let _log_guard = init_tracing(&data_dir);

  let store = NodeStore::new(Arc::new(Database::open(&data_dir.join("cache.db"))?));
  let blobs = BlobStore::new(data_dir.join("blobs"));

  let token = if args.command.needs_network() {
    profile.api_token()?
  } else {
    String::new()
  };
  let source = HttpTreeSource::new(&profile.url, token)?;
  let engine = SyncEngine::new(source, store.clone(), blobs);

  let workspace = profile.name.as_str();
  let stale_after = chrono::Duration::minutes(config.cache.stale_after_minutes);

  match args.command {
    Command::Ls { id } => {
      let children = match id {
        Some(id) => engine.expand(workspace, &resolve_id(&id)?).await?,
        None => engine.expand_top_level(workspace).await?,
      };
      print_nodes(&children, stale_after);
    }

    Command::Sync {
      id,
      refresh,
      max_depth,
      concurrency,
    } => {
      let opts = SyncOptions {
        max_depth: max_depth.unwrap_or(config.sync.max_depth),
        refresh,
        concurrency: concurrency.unwrap_or(config.sync.concurrency),
        cancel: Some(ctrl_c_flag()),
      };

      let roots = match id {
        Some(id) => vec![resolve_id(&id)?],
        None => SpecialRoot::ALL.iter().map(|r| r.well_known_id()).collect(),
      };

      let mut total = SyncOutcome::default();
      for root in roots {
        let outcome = engine
          .sync_recursive(workspace, &root, &opts, |id| eprintln!("  syncing {id}"))
          .await?;
        total.folders_fetched += outcome.folders_fetched;
        total.items_fetched += outcome.items_fetched;
        total.errors += outcome.errors;
      }
      println!(
        "Synchronized {} folders, {} items ({} errors)",
        total.folders_fetched, total.items_fetched, total.errors
      );
    }

    Command::Path { id } => {
      let id = resolve_id(&id)?;
      let path = store.path(workspace, &id)?;
      if path.is_empty() {
        return Err(eyre!("Node {id} is not cached"));
      }
      println!("{}", path.join(" / "));
    }

    Command::Search { term, limit } => {
      let hits = store.search_by_name(workspace, &term, limit)?;
      print_nodes(&hits, stale_after);
    }

    Command::Types { item_type } => {
      let hits = store.by_type(workspace, &ItemType::from_tag(&item_type))?;
      print_nodes(&hits, stale_after);
    }

    Command::Stats => {
      let stats = store.stats(workspace)?;
      println!("Workspace: {workspace}");
      println!("Total cached items: {}", stats.total_items);
      for (item_type, count) in &stats.counts_by_type {
        println!("  {item_type:<12} {count}");
      }
      if let Some(oldest) = stats.oldest_last_fetched {
        println!("Oldest record: {oldest}");
      }
      if let Some(newest) = stats.newest_last_fetched {
        println!("Newest record: {newest}");
      }
    }

    Command::Invalidate { id } => {
      let id = resolve_id(&id)?;
      engine.invalidate(workspace, &id)?;
      println!("Invalidated {id}; next ls will re-fetch its children");
    }

    Command::Evict { id } => {
      let id = resolve_id(&id)?;
      let evicted = engine.evict(workspace, &id)?;
      println!("Evicted {evicted} nodes");
    }

    Command::Export { id, output } => {
      let id = resolve_id(&id)?;
      let payload = engine.export_item(workspace, &id).await?;
      let pretty = serde_json::to_string_pretty(&payload)?;
      match output {
        Some(path) => {
          std::fs::write(&path, pretty)?;
          println!("Wrote {}", path.display());
        }
        None => println!("{pretty}"),
      }
    }
  }

  Ok(())
}

/// Resolve a user-facing id: a root category name (personal, global, ...)
/// or a hexadecimal node id.
fn resolve_id(s: &str) -> Result<NodeId> {
  if let Some(category) = SpecialRoot::from_name(s) {
    return Ok(category.well_known_id());
  }
  NodeId::parse(s).map_err(|e| eyre!("{e}"))
}

fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
  if let Some(dir) = &config.cache.data_dir {
    return Ok(dir.clone());
  }
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("canopy"))
}

/// Log to a daily-rotated file under the data dir; warnings and up also go
/// to stderr so failures during a sync are visible inline.
fn init_tracing(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
  let log_dir = data_dir.join("logs");
  let _ = std::fs::create_dir_all(&log_dir);
  let file_appender = tracing_appender::rolling::daily(log_dir, "canopy.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("canopy=info")))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false),
    )
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN),
    )
    .init();

  guard
}

/// Cancellation flag flipped by Ctrl-C; the walk stops before the next
/// folder while in-flight fetches complete.
fn ctrl_c_flag() -> Arc<AtomicBool> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = Arc::clone(&flag);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Interrupted; finishing in-flight fetches...");
      handler_flag.store(true, Ordering::Relaxed);
    }
  });
  flag
}

fn print_nodes(nodes: &[ContentNode], stale_after: chrono::Duration) {
  if nodes.is_empty() {
    println!("(empty)");
    return;
  }
  let now = chrono::Utc::now();
  for node in nodes {
    let marker = if node.is_folder() && !node.children_fetched {
      "+" // expandable, children not fetched yet
    } else if now - node.last_fetched >= stale_after {
      "*" // cached but past the staleness threshold
    } else {
      " "
    };
    println!("{marker} {:<10} {:>16}  {}", node.item_type, node.id, node.name);
  }
}

//! SQLite schema for the content tree cache.

/// Cache schema. `IF NOT EXISTS` throughout so migrations are idempotent.
pub const SCHEMA: &str = r#"
-- Cached content tree nodes, one row per (workspace, id).
-- Timestamps are RFC 3339 text.
CREATE TABLE IF NOT EXISTS content_nodes (
    workspace TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    item_type TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    description TEXT,
    created_at TEXT,
    created_by TEXT,
    modified_at TEXT,
    modified_by TEXT,
    permissions TEXT NOT NULL DEFAULT '[]',
    has_children INTEGER NOT NULL DEFAULT 0,
    children_fetched INTEGER NOT NULL DEFAULT 0,
    last_fetched TEXT NOT NULL,
    PRIMARY KEY (workspace, id)
);

CREATE INDEX IF NOT EXISTS idx_content_nodes_parent
    ON content_nodes(workspace, parent_id);

CREATE INDEX IF NOT EXISTS idx_content_nodes_type
    ON content_nodes(workspace, item_type);
"#;

//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration step inside a single transaction
async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

const ENTITY_COLUMNS: &str = "
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    data TEXT NOT NULL,
    importance INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0";

fn child_table(name: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {name} ({ENTITY_COLUMNS})")
}

fn child_indices(name: &str) -> [String; 3] {
    [
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_story ON {name}(story_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_synced ON {name}(synced)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_deleted ON {name}(deleted)"),
    ]
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements: Vec<String> = vec![
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
        // Stories are the root; children cascade on story deletion
        "CREATE TABLE IF NOT EXISTS stories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            data TEXT NOT NULL,
            importance INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_stories_user ON stories(user_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_stories_synced ON stories(synced)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_stories_deleted ON stories(deleted)".to_string(),
    ];

    for name in ["characters", "blurbs", "scenes", "chapters", "generated_stories"] {
        statements.push(child_table(name));
        statements.extend(child_indices(name));
    }

    statements.extend([
        // Pending-change queue; one row per (type, entity_id)
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            data TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE (type, entity_id)
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at)".to_string(),
        // Per-user incremental-sync baseline
        "CREATE TABLE IF NOT EXISTS sync_meta (
            user_id TEXT PRIMARY KEY,
            last_synced_at INTEGER NOT NULL
        )"
        .to_string(),
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)".to_string(),
    ]);

    let refs: Vec<&str> = statements.iter().map(String::as_str).collect();
    apply(conn, &refs).await?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: composite read-path ordering indices
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_characters_story_importance
         ON characters(story_id, importance)",
        "CREATE INDEX IF NOT EXISTS idx_scenes_story_importance
         ON scenes(story_id, importance)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements).await?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

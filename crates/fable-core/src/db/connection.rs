//! Database connection management

use std::path::Path;
use std::sync::Arc;

use libsql::{Builder, Connection, Database as LibSqlDatabase};
use tokio::sync::Mutex;

use crate::error::Result;

use super::migrations;

/// Tables wiped by [`Database::clear_all`], children before parents
const ALL_TABLES: [&str; 8] = [
    "sync_queue",
    "sync_meta",
    "generated_stories",
    "chapters",
    "scenes",
    "blurbs",
    "characters",
    "stories",
];

/// Database wrapper for libSQL connections
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for the access pattern the sync engine uses
    async fn configure(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA cache_size = 10000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Probe the connection and reopen it if it has gone stale.
    ///
    /// A cheap `SELECT 1` acts as the liveness check; on failure the old
    /// connection is dropped and a fresh one is opened from the retained
    /// database handle.
    pub async fn ensure_alive(&mut self) -> Result<()> {
        match self.conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(()),
            Err(probe_err) => {
                tracing::warn!("Database connection stale, reconnecting: {probe_err}");
                let conn = self.db.connect()?;
                conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
                self.conn = conn;
                Ok(())
            }
        }
    }

    /// Wipe every table, transactionally (used on account logout).
    ///
    /// Either everything is cleared or nothing is; a failure never leaves a
    /// partially-cleared store behind.
    pub async fn clear_all(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for table in ALL_TABLES {
            if let Err(e) = self
                .conn
                .execute(&format!("DELETE FROM {table}"), ())
                .await
            {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tracing::info!("Local store cleared");
        Ok(())
    }
}

/// Cloneable handle to the single shared database.
///
/// The engine treats the connection as one shared resource and issues
/// sequential queries against it; this handle serializes access to the
/// self-healing probe and hands out the (cheaply cloneable) connection.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    /// Wrap an opened database
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(database)),
        }
    }

    /// Open an in-memory database and wrap it (testing convenience)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    /// Get a live connection, healing it first if the probe fails
    pub async fn conn(&self) -> Result<Connection> {
        let mut guard = self.inner.lock().await;
        guard.ensure_alive().await?;
        Ok(guard.connection().clone())
    }

    /// Transactional full wipe (account logout)
    pub async fn clear_all(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.ensure_alive().await?;
        guard.clear_all().await
    }
}

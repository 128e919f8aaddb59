//! Read-Only Data Source
//!
//! Pooled SQLite access to the materialized dataset. Connections are opened
//! with `SQLITE_OPEN_READ_ONLY` and `PRAGMA query_only`, with double-quoted
//! string literals switched off so `"x"` can only name a column. Every unit of work
//! runs on the blocking pool with an interrupt handle that fires if the
//! caller goes away (sandbox timeout or cancellation).

use std::path::{Path, PathBuf};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::config::DbConfig;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tokio::sync::oneshot;

use crate::error::{ToolError, ToolResultOf};

/// Type alias for the read-only pool
pub type ReadOnlyPool = Pool<SqliteConnectionManager>;

/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Tables the engine reads. They are written by the ingestion and extraction
/// pipelines; this schema is what the tools expect to find.
pub const DATASET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hn_items (
    id INTEGER PRIMARY KEY,
    item_type TEXT NOT NULL,
    by TEXT,
    time DATETIME NOT NULL,
    text TEXT,
    url TEXT,
    score INTEGER,
    title TEXT,
    parent INTEGER,
    kids TEXT,
    descendants INTEGER,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    dead BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    entity_value TEXT NOT NULL,
    original_text TEXT NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    confidence REAL,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (item_id) REFERENCES hn_items (id)
);
CREATE TABLE IF NOT EXISTS entity_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_entity_id INTEGER NOT NULL,
    object_entity_id INTEGER NOT NULL,
    relation_type TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0,
    item_id INTEGER,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (subject_entity_id) REFERENCES entities (id),
    FOREIGN KEY (object_entity_id) REFERENCES entities (id)
);
CREATE INDEX IF NOT EXISTS idx_items_by ON hn_items(by);
CREATE INDEX IF NOT EXISTS idx_items_type ON hn_items(item_type);
CREATE INDEX IF NOT EXISTS idx_entities_value ON entities(entity_value);
CREATE INDEX IF NOT EXISTS idx_relations_subject ON entity_relations(subject_entity_id);
CREATE INDEX IF NOT EXISTS idx_relations_object ON entity_relations(object_entity_id);
"#;

/// Interrupts the running statement unless disarmed first.
struct InterruptOnDrop {
    handle: Option<InterruptHandle>,
}

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("interrupting abandoned query");
            handle.interrupt();
        }
    }
}

/// Read-only view of the dataset database.
#[derive(Clone)]
pub struct DataSource {
    pool: ReadOnlyPool,
    path: PathBuf,
}

impl DataSource {
    /// Open an existing database file read-only.
    pub fn open(path: impl AsRef<Path>) -> ToolResultOf<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: u32) -> ToolResultOf<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ToolError::execution(format!(
                "Data source not found: {}",
                path.display()
            )));
        }

        let manager = SqliteConnectionManager::file(&path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch("PRAGMA query_only = ON;")?;
                conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
                conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
                Ok(())
            });
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| {
                ToolError::execution(format!("Failed to open data source pool: {}", e))
            })?;

        tracing::info!(path = %path.display(), "opened read-only data source");
        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `work` on a pooled connection off the async runtime.
    ///
    /// If the returned future is dropped before `work` finishes, the
    /// connection is interrupted and the statement fails with
    /// `SQLITE_INTERRUPT`.
    pub async fn with_connection<F, T>(&self, work: F) -> ToolResultOf<T>
    where
        F: FnOnce(&Connection) -> ToolResultOf<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let (handle_tx, handle_rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            work(&conn)
        });

        let guard = InterruptOnDrop {
            handle: handle_rx.await.ok(),
        };
        let result = task.await.map_err(|e| {
            if e.is_panic() {
                ToolError::Panicked("data source worker panicked".to_string())
            } else {
                ToolError::execution(format!("data source worker aborted: {}", e))
            }
        });
        guard.disarm();
        result?
    }
}

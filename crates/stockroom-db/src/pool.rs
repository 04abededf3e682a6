//! # Database Handle
//!
//! Opens the engine's SQLite file and hands out the two stores built on it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──► Database::new ──► SqlitePool ──┬──► OfflineStore          │
//! │  (file or      (WAL, busy       (shared by    │    (collections)         │
//! │   in-memory)    timeout,         every task)  │                          │
//! │                 migrations)                   └──► SyncQueueRepository   │
//! │                                                    (sales/stock/purchase│
//! │                                                     queues)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent queue drains and broker commands each take their own pooled
//! connection. The in-memory database is limited to one connection because
//! every SQLite `:memory:` connection is a separate database.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::offline::OfflineStore;
use crate::repository::queue::SyncQueueRepository;
use crate::schema;

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives and how its pool is sized.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new(data_dir.join("stockroom.db")).max_connections(8);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,

    /// Pool ceiling. Default 5: three draining queues plus broker reads.
    pub max_connections: u32,

    /// How long a task waits for a free connection.
    pub acquire_timeout: Duration,

    /// How long SQLite retries a locked database before failing.
    pub busy_timeout: Duration,

    /// Apply the embedded bookkeeping migrations on open.
    pub run_migrations: bool,
}

impl DbConfig {
    /// A file-backed database, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// A throwaway database for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }

    /// Sets the pool ceiling. Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        if self.path.is_some() {
            self.max_connections = max.max(1);
        }
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::Connection(e.to_string()))?,
        };
        Ok(options.busy_timeout(self.busy_timeout))
    }

    fn describe(&self) -> String {
        self.path
            .as_deref()
            .map(Path::display)
            .map(|p| p.to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

// =============================================================================
// Database
// =============================================================================

/// Snapshot of the database's schema state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStatus {
    pub migrations_applied: usize,
    pub migrations_total: usize,
    /// Offline schema version (`PRAGMA user_version`), 0 before install.
    pub schema_version: u32,
}

impl DbStatus {
    pub fn is_current(&self) -> bool {
        self.migrations_applied == self.migrations_total && self.schema_version == schema::SCHEMA_VERSION
    }
}

/// Shared database handle. Clones share the pool.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./stockroom.db")).await?;
/// db.offline().ensure_schema().await?;
/// let pending = db.sync_queue().len("sales-sync").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database and applies pending migrations.
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready to use; the offline schema is created later, at install
    /// * `Err(DbError::Connection)` - File could not be opened or created
    /// * `Err(DbError::Migration)` - A bookkeeping migration failed
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let target = config.describe();
        info!(path = %target, max_connections = config.max_connections, "Opening database");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::Connection(format!("{target}: {e}")))?;

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        } else {
            debug!("Skipping migrations");
        }
        Ok(db)
    }

    /// The pool, for queries outside the two stores.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The durable sync queues.
    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool.clone())
    }

    /// The offline data store.
    pub fn offline(&self) -> OfflineStore {
        OfflineStore::new(self.pool.clone())
    }

    /// Migration and offline schema versions.
    pub async fn status(&self) -> DbResult<DbStatus> {
        let (migrations_total, migrations_applied) = migrations::migration_status(&self.pool).await?;
        let schema_version = schema::schema_version(&self.pool).await?;
        Ok(DbStatus {
            migrations_applied,
            migrations_total,
            schema_version,
        })
    }

    /// True if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        }
    }

    /// Closes the pool; later calls fail with [`DbError::Closed`].
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

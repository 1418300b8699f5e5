//! # Database Handle
//!
//! One SQLite file per issuing installation, shared by the issuance path and
//! the contingency processor.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──► Database::new ──► SqlitePool (WAL, foreign keys)         │
//! │                                     │                                   │
//! │          ┌──────────────────────────┼───────────────────────────┐       │
//! │          ▼                          ▼                           ▼       │
//! │   begin() → issuance tx      documents()                contingency()  │
//! │   (sequence + document +     status updates             batch updates   │
//! │    queue link, one commit)                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SQLite admits one writer at a time; the sequence increment is what takes
//! the write lock. A connection waits `busy_timeout` for it, then the
//! statement fails with [`DbError::Busy`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::error::DbResult;
use crate::migrations;
use crate::repository::contingency::ContingencyRepository;
use crate::repository::document::DocumentRepository;
use crate::repository::sequence::SequenceRepository;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    /// Private in-memory database; lives as long as its single connection.
    Memory,
}

/// Pool settings.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/dte/dte.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    location: Location,
    max_connections: u32,
    acquire_timeout: Duration,
    busy_timeout: Duration,
    migrate: bool,
}

impl DbConfig {
    /// File-backed database, created on first connect.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: Location::File(path.into()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            migrate: true,
        }
    }

    /// Single-connection in-memory database for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            location: Location::Memory,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            migrate: true,
        }
    }

    /// Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        if self.location != Location::Memory {
            self.max_connections = max.max(1);
        }
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// How long a statement waits for the write lock.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Connect without applying migrations.
    pub fn skip_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    /// Database file, `None` for in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            Location::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            Location::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared pool with repository accessors. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and brings the schema up to date.
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready for issuance
    /// * `Err(DbError::Unavailable)` - The file could not be opened
    /// * `Err(DbError::Migration)` - The schema could not be migrated
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        match config.path() {
            Some(path) => info!(path = %path.display(), "Opening document database"),
            None => info!("Opening in-memory document database"),
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            // The in-memory database disappears with its last connection.
            .idle_timeout(config.path().map(|_| Duration::from_secs(600)))
            .max_lifetime(config.path().map(|_| Duration::from_secs(3600)))
            .connect_with(config.connect_options())
            .await?;

        let db = Database { pool };
        if config.migrate {
            migrations::run_migrations(&db.pool).await?;
        }

        info!(max_connections = config.max_connections, "Document database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction. Dropping it without `commit` rolls back,
    /// including any sequence increment taken inside it.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    pub fn sequences(&self) -> SequenceRepository {
        SequenceRepository::new(self.pool.clone())
    }

    pub fn contingency(&self) -> ContingencyRepository {
        ContingencyRepository::new(self.pool.clone())
    }

    /// True when a statement runs and every embedded migration is applied.
    pub async fn health_check(&self) -> bool {
        matches!(
            migrations::migration_status(&self.pool).await,
            Ok(status) if status.is_current()
        )
    }

    /// Waits for checked-out connections, then closes the pool.
    pub async fn close(&self) {
        info!("Closing document database");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_unmigrated_database_is_unhealthy() {
        let db = Database::new(DbConfig::in_memory().skip_migrations())
            .await
            .unwrap();
        assert!(!db.health_check().await);
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dte.db");
        let db = Database::new(DbConfig::new(&path)).await.unwrap();

        assert!(path.exists());
        assert!(db.health_check().await);
        db.close().await;
        assert!(!db.health_check().await);
    }

    #[test]
    fn test_in_memory_keeps_single_connection() {
        let config = DbConfig::in_memory().max_connections(8);
        assert_eq!(config.max_connections, 1);
        assert!(config.path().is_none());

        let config = DbConfig::new("/tmp/dte.db").max_connections(0);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.path(), Some(Path::new("/tmp/dte.db")));
    }
}

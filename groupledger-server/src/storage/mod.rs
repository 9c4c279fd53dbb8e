pub mod models;
pub mod schema;

use std::sync::Arc;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// The ledger store: a pool of SQLite connections plus the clock every
/// time-window check reads.
///
/// Mutating operations run inside `BEGIN IMMEDIATE` transactions, which take
/// the database write lock before the first read. That serializes every
/// read-check-write sequence, so a re-read inside the transaction always sees
/// the latest committed balance, quantity, or highest bid.
#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        Self::connect_sqlite_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn connect_sqlite_with_clock(
        path: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                let mut conn = pool_clone.get()?;
                let applied = conn
                    .run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                debug!(count = applied.len(), "migrations applied");
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool, clock })
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Handle to the clock, for reading the time once a write lock is held.
    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Runs `f` with a pooled connection on the blocking thread pool.
    pub(crate) async fn interact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let joined = tokio::task::spawn_blocking(move || -> Result<T, E> {
            let mut conn = pool.get().map_err(StorageError::from)?;
            f(&mut conn)
        })
        .await;
        match joined {
            Ok(res) => res,
            Err(e) => Err(StorageError::Task(e).into()),
        }
    }
}

pub(crate) fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        configure_sqlite_conn(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // busy_timeout first so the journal switch waits instead of failing
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

//! Database manager implementation
//!
//! This module provides database connection management with:
//! - SQLite connection pool using r2d2
//! - Async wrapper for database operations
//! - Deferred and immediate (write-locking) transactions

use crate::core::error::{Result, RentError};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;

/// Database manager with connection pool
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
}

impl DatabaseManager {
    /// Create a new DatabaseManager with the specified database path and pool size
    pub fn new(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(busy_timeout)?;
            // WAL lets readers proceed while a writer holds the lock
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(|e| RentError::PoolError(e.to_string()))?;

        let manager = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };

        manager.migrate()?;

        Ok(manager)
    }

    /// Create a new DatabaseManager with an in-memory database for testing
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        // Every connection to :memory: is a separate database, so keep exactly one
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(|e| RentError::PoolError(e.to_string()))?;

        let manager = Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        };

        manager.migrate()?;

        Ok(manager)
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| RentError::PoolError(e.to_string()))
    }

    /// Execute a database operation asynchronously
    ///
    /// This wraps synchronous database operations in tokio::task::spawn_blocking
    /// to avoid blocking the async runtime.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| RentError::PoolError(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| RentError::TaskError(format!("Database task panicked: {}", e)))?
    }

    /// Execute a database operation within a deferred transaction
    ///
    /// The transaction is committed if the closure returns Ok and rolled back
    /// otherwise.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_transaction(TransactionBehavior::Deferred, f).await
    }

    /// Execute a read-modify-write sequence under the database write lock
    ///
    /// `BEGIN IMMEDIATE` acquires the reserved lock before the first read, so
    /// two concurrent callers touching the same row are serialised instead of
    /// both acting on the same stale snapshot.
    pub async fn immediate_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_transaction(TransactionBehavior::Immediate, f).await
    }

    async fn run_transaction<F, T>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| RentError::PoolError(e.to_string()))?;

            let tx = conn.transaction_with_behavior(behavior)?;
            let result = f(&tx)?;
            tx.commit()?;

            Ok(result)
        })
        .await
        .map_err(|e| RentError::TaskError(format!("Transaction task panicked: {}", e)))?
    }

    /// Execute database migrations
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.get_connection()?;
        crate::db::migrations::run_migrations(&mut conn)
    }

    /// Get the database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the current pool size
    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_db() -> (DatabaseManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let manager = DatabaseManager::new(&db_path, 5, Duration::from_secs(5)).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_database_manager_creation() {
        let (manager, _temp_dir) = create_test_db();
        assert_eq!(manager.pool_size(), 5);
        assert!(manager.db_path().ends_with("test.db"));
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let (manager, _temp_dir) = create_test_db();

        manager
            .execute(|conn| {
                conn.execute("CREATE TABLE counter (id INTEGER PRIMARY KEY, value INTEGER)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let result: Result<()> = manager
            .transaction(|tx| {
                tx.execute("INSERT INTO counter (value) VALUES (?)", [42])?;
                Err(RentError::InvalidRequest("test error".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = manager
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM counter", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_immediate_transactions_do_not_lose_updates() {
        let (manager, _temp_dir) = create_test_db();
        let manager = Arc::new(manager);

        manager
            .execute(|conn| {
                conn.execute_batch(
                    "CREATE TABLE counter (id INTEGER PRIMARY KEY, value INTEGER);
                     INSERT INTO counter (id, value) VALUES (1, 0);",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .immediate_transaction(|tx| {
                        let value: i64 =
                            tx.query_row("SELECT value FROM counter WHERE id = 1", [], |row| row.get(0))?;
                        tx.execute("UPDATE counter SET value = ? WHERE id = 1", [value + 1])?;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value: i64 = manager
            .execute(|conn| Ok(conn.query_row("SELECT value FROM counter WHERE id = 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(value, 20);
    }

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let manager = DatabaseManager::new_in_memory().unwrap();

        let tables: i64 = manager
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'listings')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(tables, 2);
    }
}

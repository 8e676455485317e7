//! SQLite persistence: one connection guarded by a mutex, every write unit in an
//! immediate transaction.

mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

pub use schema::SCHEMA_VERSION;

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("unable to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection mutex poisoned")]
    Poisoned,
    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },
    #[error("blocking storage task failed: {0}")]
    Worker(String),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// How long a writer waits on a locked database file before giving up.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.lock()?.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(schema::user_version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Runs read-only queries against the shared connection.
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`; commits on `Ok`, rolls back on `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

/// Runs synchronous storage work on the blocking pool so async handlers never hold a
/// runtime worker while waiting on the connection mutex or SQLite.
pub async fn run_blocking<T, E, F>(work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(error = %join_err, "blocking storage task did not complete");
            Err(StoreError::Worker(join_err.to_string()).into())
        }
    }
}

/// Reads a TEXT column holding a decimal.
pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

/// Parses a TEXT column through a domain `FromStr`-like function.
pub(crate) fn parsed_at<T, F>(row: &Row<'_>, idx: usize, parse: F) -> rusqlite::Result<T>
where
    F: FnOnce(&str) -> Option<T>,
{
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{raw}'").into(),
        )
    })
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    #[test]
    fn in_memory_database_is_migrated() {
        let db = Database::open_in_memory().expect("db opens");
        assert_eq!(db.schema_version().expect("version"), SCHEMA_VERSION);
        let tables: i64 = db
            .read(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('subject_marks', 'fee_transactions')",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .expect("query");
        assert_eq!(tables, 2);
    }

    #[test]
    fn failed_write_rolls_back() {
        let db = Database::open_in_memory().expect("db opens");
        let result: Result<(), ServiceError> = db.write(|tx| {
            tx.execute("INSERT INTO classes(name) VALUES('Grade 7')", [])?;
            Err(ServiceError::Conflict("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM classes", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn unique_violations_are_detected() {
        let db = Database::open_in_memory().expect("db opens");
        let outcome: Result<(), StoreError> = db.write(|tx| {
            tx.execute("INSERT INTO classes(name) VALUES('Grade 8')", [])?;
            let err = tx
                .execute("INSERT INTO classes(name) VALUES('Grade 8')", [])
                .expect_err("duplicate name");
            assert!(is_unique_violation(&err));
            Ok(())
        });
        outcome.expect("transaction commits");
    }

    #[tokio::test]
    async fn blocking_work_runs_off_the_runtime() {
        let db = std::sync::Arc::new(Database::open_in_memory().expect("db opens"));
        let shared = db.clone();
        let inserted = run_blocking(move || {
            shared.write(|tx| {
                tx.execute("INSERT INTO classes(name) VALUES('Grade 9')", [])?;
                Ok::<_, ServiceError>(tx.last_insert_rowid())
            })
        })
        .await
        .expect("insert");
        assert!(inserted > 0);

        let panicked = run_blocking(|| -> Result<(), ServiceError> { panic!("worker lost") }).await;
        assert!(matches!(
            panicked,
            Err(ServiceError::Persistence(StoreError::Worker(_)))
        ));
    }

    #[test]
    fn file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("school.sqlite3");
        let db = Database::open(&path).expect("db opens on disk");
        assert!(path.exists());
        assert_eq!(db.schema_version().expect("version"), SCHEMA_VERSION);
    }
}

//! Database handle
//!
//! A connection is opened per operation on the blocking pool and dropped
//! when the closure returns, on success and on error alike. Writes run in
//! an IMMEDIATE transaction so concurrent writers serialize on the
//! database lock; an uncommitted transaction rolls back when dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::task;
use tracing::debug;

use super::schema;
use crate::config::TagStoreConfig;
use crate::error::TagResult;

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Open (creating if needed) and migrate the database at `path`.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> TagResult<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        };
        db.read(|conn| {
            schema::migrate(conn)?;
            Ok(())
        })
        .await?;
        debug!("Tag database ready at {}", db.path.display());
        Ok(db)
    }

    pub async fn from_config(config: &TagStoreConfig) -> TagResult<Self> {
        Self::open(&config.database_path, config.busy_timeout).await
    }

    fn connect(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Ok(conn)
    }

    /// Run `f` against a fresh connection outside any explicit transaction.
    pub(crate) async fn read<T, F>(&self, f: F) -> TagResult<T>
    where
        F: FnOnce(&Connection) -> TagResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        task::spawn_blocking(move || {
            let conn = Self::connect(&path, busy_timeout)?;
            f(&conn)
        })
        .await?
    }

    /// Run `f` inside one IMMEDIATE transaction, committed only if `f` succeeds.
    pub(crate) async fn write<T, F>(&self, f: F) -> TagResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> TagResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        task::spawn_blocking(move || {
            let mut conn = Self::connect(&path, busy_timeout)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagError;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_failed_write_rolls_back() -> TagResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path(), Duration::from_secs(1)).await?;

        let result: TagResult<()> = db
            .write(|tx| {
                tx.execute(
                    "INSERT INTO audit_log (table_name, record_id, change_type, change_date, changed_by) \
                     VALUES ('tag_history', 1, 'INSERT', '2024-01-01T00:00:00.000Z', 'test')",
                    [],
                )?;
                Err(TagError::NotFound("forced".into()))
            })
            .await;
        assert!(matches!(result, Err(TagError::NotFound(_))));

        let count: i64 = db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?))
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() -> TagResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path(), Duration::from_secs(1)).await?;
        db.write(|tx| {
            tx.execute(
                "INSERT INTO audit_log (table_name, record_id, change_type, change_date, changed_by) \
                 VALUES ('tag_history', 7, 'DELETE', '2024-01-01T00:00:00.000Z', 'test')",
                [],
            )?;
            Ok(())
        })
        .await?;

        let reopened = Database::open(temp_file.path(), Duration::from_secs(1)).await?;
        let count: i64 = reopened
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?))
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection handling and the storage error type.

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another writer holds the database. Recoverable: the loop retries on
    /// its next tick rather than crashing.
    #[error("database is locked")]
    Locked,
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("found no {entity} matching query, expected one")]
    NotFound { entity: &'static str },
    #[error("found {count} {entity} rows matching query, expected only one")]
    MultipleRows {
        entity: &'static str,
        count: usize,
    },
    #[error("invalid value in column {column}: {value}")]
    Decode { column: &'static str, value: String },
    #[error("{0}")]
    MigrationNeeded(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if is_locked_error(&err) {
            StorageError::Locked
        } else {
            StorageError::Sqlite(err)
        }
    }
}

impl StorageError {
    /// Does this error mean the queried table does not exist yet?
    ///
    /// Flag reads tolerate this so first-run bootstrap can proceed before
    /// the schema is created.
    pub fn is_missing_table(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(message))) => {
                message.contains("no such table")
            }
            _ => false,
        }
    }
}

fn is_locked_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Handle on the embedded database.
///
/// A single cached connection behind a mutex: the owning process is the only
/// writer, and sharing one connection keeps transaction handling simple. WAL
/// mode lets other processes read concurrently.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create the file for) a database at the given path.
    ///
    /// Does not create the schema; see [`crate::ensure_db`] and
    /// [`crate::ensure_valid_db`].
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run read or autocommit-write statements against the connection.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// Immediate mode takes the write lock up front, so a concurrent writer
    /// surfaces as [`StorageError::Locked`] here rather than mid-transaction.
    /// Any closure error rolls the transaction back.
    pub fn transaction<T, E: From<StorageError>>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(result)
    }
}

fn configure(conn: &Connection) -> Result<(), StorageError> {
    // WAL so operational tooling can read while the service writes.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Much better write performance than the default without sacrificing
    // consistency guarantees.
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // How long (ms) one write transaction waits for another.
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Negative values set the cache size in KiB.
    conn.pragma_update(None, "cache_size", -256000)?;
    Ok(())
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;

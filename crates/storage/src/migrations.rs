// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned schema migrations over `PRAGMA user_version`.
//!
//! Each migration runs inside one IMMEDIATE transaction together with the
//! version bump, so a crash mid-migration leaves the previous version
//! intact.

use crate::db::{Database, StorageError};
use rusqlite::Connection;
use tracing::info;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
            CREATE TABLE job (
                id TEXT,
                rap_id TEXT,
                backend TEXT,
                workspace TEXT,
                action TEXT,
                state TEXT,
                status_code TEXT,
                status_message TEXT,
                status_code_updated_at INT,
                repo_url TEXT,
                "commit" TEXT,
                database_name TEXT,
                requires_db BOOLEAN,
                run_command TEXT,
                requires_outputs_from TEXT,
                wait_for_job_ids TEXT,
                output_spec TEXT,
                cancelled BOOLEAN,
                created_at INT,
                updated_at INT,
                started_at INT,
                completed_at INT,
                trace_context TEXT,
                analysis_scope TEXT,
                action_repo_url TEXT,
                action_commit TEXT,

                PRIMARY KEY (id)
            );

            CREATE INDEX idx_job__rap_id ON job (rap_id);

            -- Once jobs reach a terminal state the application never queries
            -- them again. Indexing only non-terminal states keeps the index
            -- small as the set of historical jobs grows.
            CREATE INDEX idx_job__state ON job (state)
                WHERE state NOT IN ('failed', 'succeeded');

            CREATE TABLE tasks (
                id TEXT,
                backend TEXT,
                type TEXT,
                definition TEXT,
                active BOOLEAN,
                created_at INT,
                finished_at INT,
                attributes TEXT,
                agent_stage TEXT,
                agent_complete BOOLEAN,
                agent_results TEXT,
                agent_timestamp_ns INT,

                PRIMARY KEY (id)
            );

            CREATE INDEX idx_tasks__backend_active ON tasks (backend, active);

            CREATE TABLE flags (
                id TEXT,
                backend TEXT,
                value TEXT,
                timestamp INT,

                PRIMARY KEY (id, backend)
            );

            CREATE TABLE rap_request (
                id TEXT,
                original TEXT,

                PRIMARY KEY (id)
            );
        "#,
    },
    Migration {
        // The maintenance scheduler polls for recently finished DBSTATUS
        // tasks; give that lookup an index.
        version: 2,
        sql: r#"
            CREATE INDEX idx_tasks__type_finished ON tasks (type, backend, finished_at);
        "#,
    },
];

/// The schema version this build expects.
pub const LATEST_VERSION: i64 = {
    // const context: MIGRATIONS is ordered, last entry is latest
    MIGRATIONS[MIGRATIONS.len() - 1].version
};

/// Read the current `user_version` of the database.
pub fn schema_version(conn: &Connection) -> Result<i64, StorageError> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Create or migrate the schema to the latest version.
pub fn ensure_db(db: &Database) -> Result<(), StorageError> {
    for migration in MIGRATIONS {
        let applied = db.transaction::<_, StorageError>(|conn| {
            if schema_version(conn)? >= migration.version {
                return Ok(false);
            }
            conn.execute_batch(migration.sql)?;
            conn.pragma_update(None, "user_version", migration.version)?;
            Ok(true)
        })?;
        if applied {
            info!(version = migration.version, "applied schema migration");
        }
    }
    Ok(())
}

/// Error unless the schema already exists at the latest version.
///
/// Services call this at startup so an out-of-date database is an explicit
/// operational error rather than a runtime surprise.
pub fn ensure_valid_db(db: &Database) -> Result<(), StorageError> {
    let version = db.with(schema_version)?;
    if version != LATEST_VERSION {
        return Err(StorageError::MigrationNeeded(format!(
            "database schema is at version {} but version {} is required; run migrations",
            version, LATEST_VERSION,
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "migrations_tests.rs"]
mod tests;

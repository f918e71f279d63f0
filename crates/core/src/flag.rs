// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-backend operational flags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognised flag names. Flags are free-form key/value pairs; these are the
/// ones the system itself reads and writes.
pub mod names {
    /// `"true"` while the backend is paused for maintenance
    pub const PAUSED: &str = "paused";
    /// `"db-maintenance"` while the backend database is under maintenance
    pub const MODE: &str = "mode";
    /// `"on"` while an operator has taken manual control of db maintenance
    pub const MANUAL_DB_MAINTENANCE: &str = "manual-db-maintenance";
    /// ISO timestamp of the last agent poll, stamped by the task RPC
    pub const LAST_SEEN_AT: &str = "last-seen-at";
}

/// The `mode` flag value that preempts database jobs.
pub const MODE_DB_MAINTENANCE: &str = "db-maintenance";

/// A `(name, backend)` keyed setting with an update timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub id: String,
    pub value: Option<String>,
    pub backend: String,
    /// Seconds since the epoch of the last value change
    pub timestamp: i64,
}

impl Flag {
    pub fn new(
        id: impl Into<String>,
        value: Option<String>,
        backend: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            value,
            backend: backend.into(),
            timestamp,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}={} ({})",
            self.backend,
            self.id,
            self.value.as_deref().unwrap_or("none"),
            self.timestamp,
        )
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
///
/// Job bookkeeping uses second resolution; status-code transitions use
/// nanosecond resolution so that sub-second state changes keep distinct,
/// ordered timestamps.
pub trait Clock: Clone + Send + Sync {
    /// Seconds since the UNIX epoch.
    fn epoch_s(&self) -> i64;

    /// Nanoseconds since the UNIX epoch.
    fn epoch_ns(&self) -> i64;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_s(&self) -> i64 {
        self.epoch_ns() / 1_000_000_000
    }

    fn epoch_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    epoch_ns: Arc<Mutex<i64>>,
}

impl FakeClock {
    /// Start well past the epoch so span sanity checks on "real" timestamps
    /// hold in tests (2001-09-09 in nanoseconds).
    pub fn new() -> Self {
        Self {
            epoch_ns: Arc::new(Mutex::new(1_000_000_000_000_000_000)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.epoch_ns.lock() += duration.as_nanos() as i64;
    }

    /// Set the clock to a specific nanosecond timestamp
    pub fn set_epoch_ns(&self, ns: i64) {
        *self.epoch_ns.lock() = ns;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn epoch_s(&self) -> i64 {
        *self.epoch_ns.lock() / 1_000_000_000
    }

    fn epoch_ns(&self) -> i64 {
        *self.epoch_ns.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

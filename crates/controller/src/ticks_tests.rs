// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gantry_core::test_support;
use gantry_core::FakeClock;
use gantry_storage::ensure_db;

#[test]
fn first_tick_only_establishes_the_window() {
    let db = Database::open_in_memory().unwrap();
    ensure_db(&db).unwrap();
    let clock = FakeClock::new();
    let first = record_tick(&db, &clock, None, &[]);
    assert_eq!(first, clock.epoch_ns());
}

#[test]
fn subsequent_ticks_advance_the_window() {
    let db = Database::open_in_memory().unwrap();
    ensure_db(&db).unwrap();
    let clock = FakeClock::new();
    let jobs = vec![test_support::job("rap-1", "generate")];

    let first = record_tick(&db, &clock, None, &jobs);
    clock.advance(Duration::from_secs(30));
    let second = record_tick(&db, &clock, Some(first), &jobs);
    assert_eq!(second, first + 30_000_000_000);
}

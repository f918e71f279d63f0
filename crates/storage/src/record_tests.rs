// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::db::Database;
use crate::migrations::ensure_db;
use gantry_core::test_support;
use gantry_core::{Flag, Job, State};
use rusqlite::types::Value;

fn db() -> Database {
    let db = Database::open_in_memory().unwrap();
    ensure_db(&db).unwrap();
    db
}

#[test]
fn insert_and_find_round_trip() {
    let db = db();
    let job = test_support::job("rap-1", "generate");
    db.with(|conn| insert(conn, &job)).unwrap();

    let found: Vec<Job> = db
        .with(|conn| find_where(conn, &Filter::new().eq("rap_id", "rap-1")))
        .unwrap();
    assert_eq!(found, vec![job]);
}

#[test]
fn find_one_distinguishes_missing_and_ambiguous() {
    let db = db();
    let err = db
        .with(|conn| find_one::<Job>(conn, &Filter::new().eq("rap_id", "nope")))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));

    db.with(|conn| {
        insert(conn, &test_support::job("rap-1", "a"))?;
        insert(conn, &test_support::job("rap-1", "b"))
    })
    .unwrap();
    let err = db
        .with(|conn| find_one::<Job>(conn, &Filter::new().eq("rap_id", "rap-1")))
        .unwrap_err();
    assert!(matches!(err, StorageError::MultipleRows { count: 2, .. }));
}

#[test]
fn any_of_matches_listed_values_only() {
    let db = db();
    db.with(|conn| {
        let mut job = test_support::job("rap-1", "a");
        job.state = State::Running;
        insert(conn, &job)?;
        let mut job = test_support::job("rap-1", "b");
        job.state = State::Succeeded;
        insert(conn, &job)
    })
    .unwrap();

    let active: Vec<Job> = db
        .with(|conn| {
            find_where(
                conn,
                &Filter::new().any_of(
                    "state",
                    [
                        Value::Text("pending".to_string()),
                        Value::Text("running".to_string()),
                    ],
                ),
            )
        })
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].action, "a");
}

#[test]
fn any_of_with_no_values_matches_nothing() {
    let db = db();
    db.with(|conn| insert(conn, &test_support::job("rap-1", "a")))
        .unwrap();
    let found: Vec<Job> = db
        .with(|conn| find_where(conn, &Filter::new().any_of("state", [])))
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn glob_filters_by_pattern() {
    let db = db();
    let job = test_support::job("rap-1", "a");
    db.with(|conn| {
        insert(conn, &test_support::runjob_task(&job, 1))?;
        insert(conn, &test_support::runjob_task(&job, 2))?;
        let other = test_support::job("rap-2", "b");
        insert(conn, &test_support::runjob_task(&other, 1))
    })
    .unwrap();

    let tasks: Vec<gantry_core::Task> = db
        .with(|conn| {
            find_where(conn, &Filter::new().glob("id", format!("{}-*", job.id)))
        })
        .unwrap();
    assert_eq!(tasks.len(), 2);
}

#[test]
fn lt_and_gt_compare_integers() {
    let db = db();
    db.with(|conn| {
        let mut job = test_support::job("rap-1", "a");
        job.created_at = 100;
        insert(conn, &job)?;
        let mut job = test_support::job("rap-1", "b");
        job.created_at = 200;
        insert(conn, &job)
    })
    .unwrap();

    let older: Vec<Job> = db
        .with(|conn| find_where(conn, &Filter::new().lt("created_at", 150)))
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].action, "a");

    let newer: Vec<Job> = db
        .with(|conn| find_where(conn, &Filter::new().gt("created_at", 150)))
        .unwrap();
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].action, "b");
}

#[test]
fn null_filter_matches_unset_columns() {
    let db = db();
    db.with(|conn| {
        let mut job = test_support::job("rap-1", "a");
        job.started_at = Some(100);
        insert(conn, &job)?;
        insert(conn, &test_support::job("rap-1", "b"))
    })
    .unwrap();

    let unstarted: Vec<Job> = db
        .with(|conn| find_where(conn, &Filter::new().null("started_at")))
        .unwrap();
    assert_eq!(unstarted.len(), 1);
    assert_eq!(unstarted[0].action, "b");
}

#[test]
fn update_rewrites_all_but_excluded_columns() {
    let db = db();
    let mut job = test_support::job("rap-1", "a");
    db.with(|conn| insert(conn, &job)).unwrap();

    // Simulate the cancel flag being flipped externally while we hold a
    // stale copy: an update excluding `cancelled` must not clobber it.
    db.with(|conn| {
        update_where::<Job>(
            conn,
            &[("cancelled", Value::from(true))],
            &Filter::new().eq("id", job.id.as_str()),
        )
    })
    .unwrap();

    job.status_message = "Waiting on dependencies".to_string();
    db.with(|conn| update(conn, &job, &["cancelled"])).unwrap();

    let stored: Job = db
        .with(|conn| find_one(conn, &Filter::new().eq("id", job.id.as_str())))
        .unwrap();
    assert_eq!(stored.status_message, "Waiting on dependencies");
    assert!(stored.cancelled, "excluded column must keep its value");
}

#[test]
fn upsert_inserts_then_updates_on_conflict() {
    let db = db();
    let flag = Flag::new("paused", Some("true".to_string()), "test", 100);
    db.with(|conn| upsert(conn, &flag)).unwrap();
    let changed = Flag::new("paused", None, "test", 200);
    db.with(|conn| upsert(conn, &changed)).unwrap();

    let stored: Flag = db
        .with(|conn| {
            find_one(conn, &Filter::new().eq("id", "paused").eq("backend", "test"))
        })
        .unwrap();
    assert_eq!(stored.value, None);
    assert_eq!(stored.timestamp, 200);
}

#[test]
fn exists_and_count_agree() {
    let db = db();
    assert!(!db
        .with(|conn| exists_where::<Job>(conn, &Filter::new()))
        .unwrap());
    db.with(|conn| {
        insert(conn, &test_support::job("rap-1", "a"))?;
        insert(conn, &test_support::job("rap-1", "b"))
    })
    .unwrap();
    assert!(db
        .with(|conn| exists_where::<Job>(conn, &Filter::new()))
        .unwrap());
    assert_eq!(
        db.with(|conn| count_where::<Job>(conn, &Filter::new()))
            .unwrap(),
        2
    );
}

#[test]
fn select_values_returns_single_column() {
    let db = db();
    db.with(|conn| {
        insert(conn, &test_support::job("rap-1", "a"))?;
        insert(conn, &test_support::job("rap-1", "b"))
    })
    .unwrap();
    let mut actions: Vec<String> = db
        .with(|conn| select_values::<Job, String>(conn, "action", &Filter::new()))
        .unwrap();
    actions.sort();
    assert_eq!(actions, vec!["a", "b"]);
}

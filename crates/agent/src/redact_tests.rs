// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::BTreeMap;

fn full_results() -> JobResults {
    JobResults {
        outputs: BTreeMap::from([(
            "output/secret-cohort.csv".to_string(),
            "highly_sensitive".to_string(),
        )]),
        unmatched_patterns: vec![],
        unmatched_outputs: vec![],
        exit_code: Some(0),
        image_id: "sha256:feed".to_string(),
        message: Some("all done".to_string()),
        unmatched_hint: None,
        timestamp_ns: Some(1_000),
        level4_excluded_files: BTreeMap::new(),
        action_version: "v2".to_string(),
        action_revision: "abc".to_string(),
        action_created: "2026-01-01".to_string(),
        base_revision: "def".to_string(),
        base_created: "2025-12-01".to_string(),
    }
}

#[test]
fn clean_results_keep_message_and_metadata() {
    let redacted = redact_results(&full_results());
    assert_eq!(redacted.exit_code, Some(0));
    assert_eq!(redacted.message.as_deref(), Some("all done"));
    assert_eq!(redacted.action_revision, "abc");
    assert!(!redacted.has_unmatched_patterns);
    assert!(!redacted.has_level4_excluded_files);
}

#[test]
fn output_lists_never_survive_redaction() {
    let redacted = redact_results(&full_results());
    let value = serde_json::to_value(&redacted).unwrap();
    let text = value.to_string();
    assert!(!text.contains("secret-cohort"), "raw filenames must not leak");
    assert!(value.get("outputs").is_none());
    assert!(value.get("unmatched_outputs").is_none());
    assert!(value.get("unmatched_patterns").is_none());
}

#[test]
fn unmatched_patterns_become_a_boolean_and_blank_the_text() {
    let mut results = full_results();
    results.unmatched_patterns = vec!["output/missing-*.csv".to_string()];
    results.message = Some("no file matching output/missing-*.csv".to_string());
    results.unmatched_hint = Some("did you mean output/missing.csv?".to_string());

    let redacted = redact_results(&results);
    assert!(redacted.has_unmatched_patterns);
    assert_eq!(redacted.message, None);
    assert_eq!(redacted.unmatched_hint, None);
}

#[test]
fn unmatched_outputs_also_blank_the_text() {
    let mut results = full_results();
    results.unmatched_outputs = vec!["output/surprise.csv".to_string()];
    results.message = Some("produced unexpected output/surprise.csv".to_string());

    let redacted = redact_results(&results);
    // Unexpected outputs alone do not flag unmatched patterns
    assert!(!redacted.has_unmatched_patterns);
    assert_eq!(redacted.message, None);
}

#[test]
fn level4_exclusions_become_a_boolean() {
    let mut results = full_results();
    results
        .level4_excluded_files
        .insert("output/big.csv".to_string(), "too large".to_string());
    let redacted = redact_results(&results);
    assert!(redacted.has_level4_excluded_files);
    let text = serde_json::to_value(&redacted).unwrap().to_string();
    assert!(!text.contains("big.csv"));
}

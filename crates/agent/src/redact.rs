// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result redaction: raw output names never leave the agent.

use gantry_core::JobTaskResults;
use gantry_executor::JobResults;

/// Reduce full executor results to the controller-safe form.
///
/// The output, unmatched-output and unmatched-pattern lists collapse into
/// booleans. When anything was unmatched, the message and hint are dropped
/// too: they may quote raw filenames.
pub fn redact_results(results: &JobResults) -> JobTaskResults {
    let has_unmatched_patterns = !results.unmatched_patterns.is_empty();
    let has_unmatched_outputs = !results.unmatched_outputs.is_empty();
    let redact_text = has_unmatched_patterns || has_unmatched_outputs;

    JobTaskResults {
        exit_code: results.exit_code,
        image_id: results.image_id.clone(),
        message: if redact_text {
            None
        } else {
            results.message.clone()
        },
        unmatched_hint: if redact_text {
            None
        } else {
            results.unmatched_hint.clone()
        },
        timestamp_ns: results.timestamp_ns,
        action_version: results.action_version.clone(),
        action_revision: results.action_revision.clone(),
        action_created: results.action_created.clone(),
        base_revision: results.base_revision.clone(),
        base_created: results.base_created.clone(),
        has_unmatched_patterns,
        has_level4_excluded_files: !results.level4_excluded_files.is_empty(),
    }
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;

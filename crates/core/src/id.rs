// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed identifiers and deterministic ID generation

use sha2::{Digest, Sha256};

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a job.
    ///
    /// Derived deterministically from the RAP id and action name so that
    /// re-submitting the same request always maps onto the same jobs.
    #[derive(Default)]
    pub struct JobId;
}

define_id! {
    /// Unique identifier for a task handed to an agent.
    ///
    /// RUNJOB task ids are `<job_id>-NNN` with a zero-padded sequence number
    /// so lexical order matches creation order; the matching CANCELJOB task
    /// is `<runjob_id>-cancel`.
    #[derive(Default)]
    pub struct TaskId;
}

impl JobId {
    /// Derive the job id for an action within a RAP request.
    pub fn for_action(rap_id: &str, action: &str) -> Self {
        Self(deterministic_id(&format!("{}\n{}", rap_id, action)))
    }
}

/// Hash a seed string into a short stable identifier (20 hex chars).
///
/// Used for job ids: the same seed always yields the same id, so recreating
/// the database mid-run does not orphan jobs.
pub fn deterministic_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let mut out = String::with_capacity(20);
    for byte in digest.iter().take(10) {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;

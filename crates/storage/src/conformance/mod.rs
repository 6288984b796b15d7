//! Conformance test suite for `VerifierStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `VerifierStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Query**: time-window bounds, instance scoping, `deleted_max`, paging
//! - **Claim**: `pending -> verifying` claims, conflicts, abort rollback
//! - **Transition**: lifecycle rules enforced by `update_exists`
//! - **Concurrent**: racing claims on the same snapshot
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh storage instance seeded with the given records:
//!
//! ```ignore
//! use verifier_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|seed| async move {
//!         create_test_postgres_storage(seed).await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod claim;
mod concurrent;
mod query;
mod transition;

use std::fmt;
use std::future::Future;

use crate::record::StorageSeed;
use crate::VerifierStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "query", "claim").
    pub category: String,
    /// Test name (e.g. "launch_window_is_inclusive").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` is called once per test with the records that test needs,
/// and must return a fresh storage instance containing exactly those records.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(query::run_query_tests(&factory).await);
    results.extend(claim::run_claim_tests(&factory).await);
    results.extend(transition::run_transition_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

/// Assert helper returning the suite's `Result<(), String>` shape.
fn check(cond: bool, msg: impl FnOnce() -> String) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(msg())
    }
}

//! Conformance test suite for `KeyValueStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `KeyValueStore` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Basic**: get/set/delete semantics, overwrite, missing keys
//! - **Batch**: ordered, all-or-nothing `write_batch` application
//! - **Prefix**: ordered `keys_with_prefix` enumeration
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use fieldsync_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async { open_scratch_sqlite().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod basic;
mod batch;
mod prefix;

use std::fmt;
use std::future::Future;

use crate::KeyValueStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "basic", "batch").
    pub category: String,
    /// Test name (e.g. "set_then_get_returns_value").
    pub name: String,
    /// Whether the test passed.
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

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(basic::run_basic_tests(&factory).await);
    results.extend(batch::run_batch_tests(&factory).await);
    results.extend(prefix::run_prefix_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn expect_value<S: KeyValueStore>(
    store: &S,
    key: &str,
    expected: Option<&str>,
) -> Result<(), String> {
    let got = store
        .get(key)
        .await
        .map_err(|e| format!("get {key}: {e}"))?;
    if got.as_deref() != expected {
        return Err(format!("key {key}: expected {expected:?}, got {got:?}"));
    }
    Ok(())
}

//! Conformance test suite for `LifecycleStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `LifecycleStorage` implementation can run to verify correctness. The
//! suite covers:
//!
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-statement snapshots
//! - **Row locks**: locking reads skip missing rows and block other snapshots
//! - **Deletes**: rows removed at commit, counts reported
//! - **Error handling**: correct error variants for invalid statements
//!
//! # Fixture
//!
//! Every test starts from a fresh storage holding two tables keyed by
//! [`ID_FIELD`]: [`OBJECT_TABLE`] with a `status` column, and
//! [`DISCOVERY_TABLE`] with the columns in [`DISCOVERY_COLUMNS`]. Both hold
//! the rows in [`FIXTURE_IDS`] with every column set to 0.
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, seeded storage instance for each test:
//!
//! ```ignore
//! use lapse_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_seeded_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod delete;
mod error;
mod lock;
mod snapshot;

use std::fmt;
use std::future::Future;

use crate::record::STATUS_COLUMN;
use crate::statement::{Assignment, Statement};
use crate::LifecycleStorage;

/// Object table of the fixture.
pub const OBJECT_TABLE: &str = "objects";
/// Discovery-record table of the fixture.
pub const DISCOVERY_TABLE: &str = "object_discovery";
/// Id field of both fixture tables.
pub const ID_FIELD: &str = "objectid";
/// Columns of the fixture discovery-record table.
pub const DISCOVERY_COLUMNS: [&str; 5] =
    ["lastcheck", "status", "disable_source", "ts_delete", "ts_disable"];
/// Rows present in both fixture tables.
pub const FIXTURE_IDS: [u64; 3] = [1, 2, 3];

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "snapshot", "lock").
    pub category: String,
    /// Test name (e.g. "uncommitted_update_invisible").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
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
/// The `factory` function is called once per test to create a fresh storage
/// instance seeded with the fixture described in the module docs.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(lock::run_lock_tests(&factory).await);
    results.extend(delete::run_delete_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);

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

fn set_object_status(id: u64, status: i64) -> Statement {
    Statement::SetColumns {
        table: OBJECT_TABLE.to_string(),
        id_field: ID_FIELD.to_string(),
        id,
        assignments: vec![Assignment::new(STATUS_COLUMN, status)],
    }
}

fn touch_lastcheck(ids: &[u64], now: i64) -> Statement {
    Statement::SetColumnForIds {
        table: DISCOVERY_TABLE.to_string(),
        id_field: ID_FIELD.to_string(),
        column: "lastcheck".to_string(),
        value: now,
        ids: ids.to_vec(),
    }
}

async fn committed_value<S: LifecycleStorage>(
    s: &S,
    table: &str,
    id: u64,
    column: &str,
) -> Result<Option<i64>, String> {
    let row = s.read_row(table, id).await.map_err(|e| e.to_string())?;
    Ok(row.and_then(|r| r.get(column)))
}

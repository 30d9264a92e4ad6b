//! Conformance test suite for `WriteLog` implementations.
//!
//! This module provides a backend-agnostic test suite that any `WriteLog`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Order**: entries come back in insertion order, head first
//! - **Mutation**: removal by sequence number or position, in-place replace
//! - **Error handling**: correct error variants for invalid operations
//! - **Concurrency**: concurrent appends from many tasks are all retained
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty log for each test:
//!
//! ```ignore
//! use courier_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_sqlite_log().await
//!     }).await;
//!     assert!(report.failed() == 0, "{report}");
//! }
//! ```

mod concurrent;
mod error;
mod mutate;
mod order;

use std::fmt;
use std::future::Future;

use courier_interchange::{Request, StoreUpdate};

use crate::{PersistedEntry, StorageError, WriteLog};

/// Group a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Order,
    Mutate,
    Error,
    Concurrent,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Order => "order",
            Category::Mutate => "mutate",
            Category::Error => "error",
            Category::Concurrent => "concurrent",
        })
    }
}

/// A `WriteLog` method, as named in a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Append,
    Remove,
    RemoveAt,
    Replace,
    Len,
    IsEmpty,
    All,
    Clear,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Append => "append",
            Op::Remove => "remove",
            Op::RemoveAt => "remove_at",
            Op::Replace => "replace",
            Op::Len => "len",
            Op::IsEmpty => "is_empty",
            Op::All => "all",
            Op::Clear => "clear",
        })
    }
}

/// Why a check failed.
#[derive(Debug)]
pub enum Violation {
    /// A log method returned an error where the check expected success.
    Operation { op: Op, error: StorageError },
    /// The log answered, but its contents or error variant were wrong.
    State(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Operation { op, error } => write!(f, "{op} failed: {error}"),
            Violation::State(msg) => f.write_str(msg),
        }
    }
}

fn failed(op: Op) -> impl FnOnce(StorageError) -> Violation {
    move |error| Violation::Operation { op, error }
}

/// Outcome of one check.
#[derive(Debug)]
pub struct CheckResult {
    pub category: Category,
    pub check: &'static str,
    pub violation: Option<Violation>,
}

impl CheckResult {
    fn new(category: Category, check: &'static str, outcome: Result<(), Violation>) -> Self {
        Self {
            category,
            check,
            violation: outcome.err(),
        }
    }

    pub fn passed(&self) -> bool {
        self.violation.is_none()
    }
}

/// Every check run against one backend.
#[derive(Debug)]
pub struct ConformanceReport {
    pub results: Vec<CheckResult>,
}

impl ConformanceReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// Methods that returned an unexpected error, in check order.
    pub fn failing_operations(&self) -> Vec<Op> {
        let mut ops = Vec::new();
        for r in &self.results {
            if let Some(Violation::Operation { op, .. }) = &r.violation {
                if !ops.contains(op) {
                    ops.push(*op);
                }
            }
        }
        ops
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "write log conformance: {} of {} checks failed",
            self.failed(),
            self.results.len()
        )?;
        for category in [
            Category::Order,
            Category::Mutate,
            Category::Error,
            Category::Concurrent,
        ] {
            let failures: Vec<_> = self
                .results
                .iter()
                .filter(|r| r.category == category && !r.passed())
                .collect();
            if failures.is_empty() {
                continue;
            }
            writeln!(f, "  {category}:")?;
            for r in failures {
                if let Some(v) = &r.violation {
                    writeln!(f, "    {}: {v}", r.check)?;
                }
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a write log backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// log, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(order::run_order_tests(&factory).await);
    results.extend(mutate::run_mutate_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    ConformanceReport { results }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn make_request(command: &str, report_id: &str) -> Request {
    let mut data = serde_json::Map::new();
    data.insert("apiRequestType".to_string(), serde_json::json!("write"));
    data.insert("reportID".to_string(), serde_json::json!(report_id));
    Request {
        command: command.to_string(),
        data,
        success_data: Vec::new(),
        failure_data: vec![StoreUpdate::Merge {
            key: format!("report_{report_id}"),
            value: serde_json::json!({"errors": {"generic": "failed"}}),
        }],
        finally_data: Vec::new(),
        optimistic_ids: Vec::new(),
    }
}

fn make_entry(seq: u64, command: &str) -> PersistedEntry {
    PersistedEntry::new(seq, make_request(command, &format!("r{seq}")))
}

async fn commands<S: WriteLog>(log: &S) -> Result<Vec<String>, Violation> {
    Ok(log
        .all()
        .await
        .map_err(failed(Op::All))?
        .into_iter()
        .map(|e| e.request.command)
        .collect())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::MemoryWriteLog;

    /// Delegates to memory but cannot count its entries.
    struct NoLen(MemoryWriteLog);

    #[async_trait]
    impl WriteLog for NoLen {
        async fn append(&self, entry: PersistedEntry) -> Result<(), StorageError> {
            self.0.append(entry).await
        }
        async fn remove(&self, seq: u64) -> Result<PersistedEntry, StorageError> {
            self.0.remove(seq).await
        }
        async fn remove_at(&self, index: usize) -> Result<PersistedEntry, StorageError> {
            self.0.remove_at(index).await
        }
        async fn replace(&self, seq: u64, request: Request) -> Result<(), StorageError> {
            self.0.replace(seq, request).await
        }
        async fn len(&self) -> Result<usize, StorageError> {
            Err(StorageError::Backend("disk offline".to_string()))
        }
        async fn all(&self) -> Result<Vec<PersistedEntry>, StorageError> {
            self.0.all().await
        }
        async fn clear(&self) -> Result<(), StorageError> {
            self.0.clear().await
        }
    }

    #[tokio::test]
    async fn report_names_the_failing_operation() {
        let report = run_conformance_suite(|| async { NoLen(MemoryWriteLog::new()) }).await;

        assert!(report.failed() > 0);
        assert_eq!(report.failing_operations().first(), Some(&Op::Len));
        assert!(!report.failing_operations().contains(&Op::Append));

        let text = report.to_string();
        assert!(text.contains("order:"), "{text}");
        assert!(
            text.contains("new_log_is_empty: len failed: write log backend error: disk offline"),
            "{text}"
        );
    }
}

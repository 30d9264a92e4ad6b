use std::future::Future;
use std::sync::Arc;

use super::{failed, make_entry, Category, CheckResult, Op, Violation};
use crate::WriteLog;

/// Number of concurrent tasks to spawn in each test.
const N: u64 = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<CheckResult>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(CheckResult::new(
        Category::Concurrent,
        "concurrent_appends_all_retained",
        concurrent_appends_all_retained(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Concurrent,
        "concurrent_duplicate_exactly_one_wins",
        concurrent_duplicate_exactly_one_wins(factory).await,
    ));

    results
}

// ── Concurrent appends: nothing lost ────────────────────────────────────────

/// N tasks append distinct entries at once. All of them must be present and
/// each entry must appear exactly once.
async fn concurrent_appends_all_retained<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = Arc::new(factory().await);

    let mut handles = Vec::new();
    for seq in 1..=N {
        let l = log.clone();
        handles.push(tokio::spawn(async move {
            l.append(make_entry(seq, &format!("cmd-{seq}"))).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| Violation::State(format!("task panic: {e}")))?
            .map_err(failed(Op::Append))?;
    }

    let mut seqs: Vec<u64> = log
        .all()
        .await
        .map_err(failed(Op::All))?
        .into_iter()
        .map(|e| e.seq)
        .collect();
    seqs.sort_unstable();
    let expected: Vec<u64> = (1..=N).collect();
    if seqs != expected {
        return Err(Violation::State(format!("expected seqs {expected:?}, got {seqs:?}")));
    }
    Ok(())
}

// ── Concurrent duplicate: exactly one wins ──────────────────────────────────

/// N tasks append the same sequence number. Exactly one append succeeds;
/// the rest must be rejected.
async fn concurrent_duplicate_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let l = log.clone();
        handles.push(tokio::spawn(async move {
            l.append(make_entry(1, &format!("racer-{i}"))).await.is_ok()
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        if handle.await.map_err(|e| Violation::State(format!("task panic: {e}")))? {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(Violation::State(format!("expected exactly 1 winner, got {winners}")));
    }
    let len = log.len().await.map_err(failed(Op::Len))?;
    if len != 1 {
        return Err(Violation::State(format!("expected 1 entry, got {len}")));
    }
    Ok(())
}

use std::future::Future;

use super::{failed, make_entry, make_request, Category, CheckResult, Op, Violation};
use crate::{StorageError, WriteLog};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<CheckResult>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(CheckResult::new(
        Category::Error,
        "remove_missing_seq",
        remove_missing_seq(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Error,
        "remove_at_past_tail",
        remove_at_past_tail(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Error,
        "replace_missing_seq",
        replace_missing_seq(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Error,
        "duplicate_seq_rejected",
        duplicate_seq_rejected(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Error,
        "failed_operations_leave_log_intact",
        failed_operations_leave_log_intact(factory).await,
    ));

    results
}

async fn remove_missing_seq<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    match log.remove(99).await {
        Err(StorageError::EntryNotFound { seq: 99 }) => Ok(()),
        Err(e) => Err(Violation::State(format!("expected EntryNotFound {{ seq: 99 }}, got {e:?}"))),
        Ok(entry) => Err(Violation::State(format!("expected error, removed {entry:?}"))),
    }
}

async fn remove_at_past_tail<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    log.append(make_entry(1, "A"))
        .await
        .map_err(failed(Op::Append))?;
    match log.remove_at(1).await {
        Err(StorageError::IndexOutOfRange { index: 1, len: 1 }) => Ok(()),
        Err(e) => Err(Violation::State(format!("expected IndexOutOfRange, got {e:?}"))),
        Ok(entry) => Err(Violation::State(format!("expected error, removed {entry:?}"))),
    }
}

async fn replace_missing_seq<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    match log.replace(5, make_request("X", "r5")).await {
        Err(StorageError::EntryNotFound { seq: 5 }) => Ok(()),
        Err(e) => Err(Violation::State(format!("expected EntryNotFound {{ seq: 5 }}, got {e:?}"))),
        Ok(()) => Err(Violation::State("expected error replacing a missing entry".to_string())),
    }
}

async fn duplicate_seq_rejected<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    log.append(make_entry(1, "A"))
        .await
        .map_err(failed(Op::Append))?;
    match log.append(make_entry(1, "A-again")).await {
        Err(StorageError::DuplicateSeq { seq: 1 }) => Ok(()),
        Err(e) => Err(Violation::State(format!("expected DuplicateSeq {{ seq: 1 }}, got {e:?}"))),
        Ok(()) => Err(Violation::State("duplicate seq was accepted".to_string())),
    }
}

async fn failed_operations_leave_log_intact<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    log.append(make_entry(1, "A"))
        .await
        .map_err(failed(Op::Append))?;
    let _ = log.append(make_entry(1, "dup")).await;
    let _ = log.remove(42).await;
    let _ = log.remove_at(9).await;
    let _ = log.replace(42, make_request("X", "x")).await;

    let all = log.all().await.map_err(failed(Op::All))?;
    if all.len() != 1 || all[0].request.command != "A" {
        return Err(Violation::State(format!("log changed after failed operations: {all:?}")));
    }
    Ok(())
}

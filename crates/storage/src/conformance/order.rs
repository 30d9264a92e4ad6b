use std::future::Future;

use super::{commands, failed, make_entry, Category, CheckResult, Op, Violation};
use crate::WriteLog;

pub(super) async fn run_order_tests<S, F, Fut>(factory: &F) -> Vec<CheckResult>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(CheckResult::new(
        Category::Order,
        "new_log_is_empty",
        new_log_is_empty(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Order,
        "all_returns_insertion_order",
        all_returns_insertion_order(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Order,
        "order_follows_append_not_seq",
        order_follows_append_not_seq(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Order,
        "len_tracks_appends",
        len_tracks_appends(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Order,
        "entry_round_trips_unchanged",
        entry_round_trips_unchanged(factory).await,
    ));

    results
}

async fn new_log_is_empty<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    let len = log.len().await.map_err(failed(Op::Len))?;
    if len != 0 {
        return Err(Violation::State(format!("expected empty log, got {len} entries")));
    }
    if !log.is_empty().await.map_err(failed(Op::IsEmpty))? {
        return Err(Violation::State("is_empty returned false for a new log".to_string()));
    }
    Ok(())
}

async fn all_returns_insertion_order<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    for (seq, command) in [(1, "A"), (2, "B"), (3, "C"), (4, "D")] {
        log.append(make_entry(seq, command))
            .await
            .map_err(failed(Op::Append))?;
    }
    let got = commands(&log).await?;
    if got != ["A", "B", "C", "D"] {
        return Err(Violation::State(format!("expected [A, B, C, D], got {got:?}")));
    }
    Ok(())
}

/// Position is decided by the append call, not by the sequence number.
async fn order_follows_append_not_seq<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    log.append(make_entry(10, "first"))
        .await
        .map_err(failed(Op::Append))?;
    log.append(make_entry(3, "second"))
        .await
        .map_err(failed(Op::Append))?;
    let got = commands(&log).await?;
    if got != ["first", "second"] {
        return Err(Violation::State(format!("expected [first, second], got {got:?}")));
    }
    Ok(())
}

async fn len_tracks_appends<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    for seq in 1..=5 {
        log.append(make_entry(seq, "Cmd"))
            .await
            .map_err(failed(Op::Append))?;
        let len = log.len().await.map_err(failed(Op::Len))?;
        if len != seq as usize {
            return Err(Violation::State(format!("after {seq} appends, len was {len}")));
        }
    }
    Ok(())
}

async fn entry_round_trips_unchanged<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    let entry = make_entry(7, "AddComment");
    log.append(entry.clone())
        .await
        .map_err(failed(Op::Append))?;
    let all = log.all().await.map_err(failed(Op::All))?;
    match all.as_slice() {
        [stored] if *stored == entry => Ok(()),
        other => Err(Violation::State(format!("expected exactly the appended entry, got {other:?}"))),
    }
}

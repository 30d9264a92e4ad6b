use std::future::Future;

use super::{commands, failed, make_entry, make_request, Category, CheckResult, Op, Violation};
use crate::WriteLog;

pub(super) async fn run_mutate_tests<S, F, Fut>(factory: &F) -> Vec<CheckResult>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(CheckResult::new(
        Category::Mutate,
        "remove_head_advances",
        remove_head_advances(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Mutate,
        "remove_middle_keeps_order",
        remove_middle_keeps_order(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Mutate,
        "remove_at_uses_position",
        remove_at_uses_position(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Mutate,
        "replace_keeps_position_and_seq",
        replace_keeps_position_and_seq(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Mutate,
        "clear_empties_log",
        clear_empties_log(factory).await,
    ));
    results.push(CheckResult::new(
        Category::Mutate,
        "append_after_remove_goes_to_tail",
        append_after_remove_goes_to_tail(factory).await,
    ));

    results
}

async fn seeded<S, F, Fut>(factory: &F) -> Result<S, Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = factory().await;
    for (seq, command) in [(1, "A"), (2, "B"), (3, "C")] {
        log.append(make_entry(seq, command))
            .await
            .map_err(failed(Op::Append))?;
    }
    Ok(log)
}

async fn remove_head_advances<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    let removed = log.remove(1).await.map_err(failed(Op::Remove))?;
    if removed.request.command != "A" {
        return Err(Violation::State(format!("removed wrong entry: {}", removed.request.command)));
    }
    let got = commands(&log).await?;
    if got != ["B", "C"] {
        return Err(Violation::State(format!("expected [B, C], got {got:?}")));
    }
    Ok(())
}

async fn remove_middle_keeps_order<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    log.remove(2).await.map_err(failed(Op::Remove))?;
    let got = commands(&log).await?;
    if got != ["A", "C"] {
        return Err(Violation::State(format!("expected [A, C], got {got:?}")));
    }
    Ok(())
}

async fn remove_at_uses_position<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    let removed = log
        .remove_at(1)
        .await
        .map_err(failed(Op::RemoveAt))?;
    if removed.seq != 2 {
        return Err(Violation::State(format!("remove_at(1) removed seq {}", removed.seq)));
    }
    let removed = log
        .remove_at(0)
        .await
        .map_err(failed(Op::RemoveAt))?;
    if removed.seq != 1 {
        return Err(Violation::State(format!("remove_at(0) removed seq {}", removed.seq)));
    }
    let got = commands(&log).await?;
    if got != ["C"] {
        return Err(Violation::State(format!("expected [C], got {got:?}")));
    }
    Ok(())
}

async fn replace_keeps_position_and_seq<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    let before = log.all().await.map_err(failed(Op::All))?;

    log.replace(2, make_request("B2", "real_42"))
        .await
        .map_err(failed(Op::Replace))?;

    let after = log.all().await.map_err(failed(Op::All))?;
    let got: Vec<&str> = after.iter().map(|e| e.request.command.as_str()).collect();
    if got != ["A", "B2", "C"] {
        return Err(Violation::State(format!("expected [A, B2, C], got {got:?}")));
    }
    if after[1].seq != 2 || after[1].queued_at != before[1].queued_at {
        return Err(Violation::State("replace changed seq or queued_at".to_string()));
    }
    if after[1].request.data.get("reportID") != Some(&serde_json::json!("real_42")) {
        return Err(Violation::State("replace did not store the new request".to_string()));
    }
    Ok(())
}

async fn clear_empties_log<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    log.clear().await.map_err(failed(Op::Clear))?;
    let len = log.len().await.map_err(failed(Op::Len))?;
    if len != 0 {
        return Err(Violation::State(format!("expected empty log after clear, got {len}")));
    }
    Ok(())
}

async fn append_after_remove_goes_to_tail<S, F, Fut>(factory: &F) -> Result<(), Violation>
where
    S: WriteLog,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let log = seeded(factory).await?;
    log.remove(1).await.map_err(failed(Op::Remove))?;
    log.append(make_entry(4, "D"))
        .await
        .map_err(failed(Op::Append))?;
    let got = commands(&log).await?;
    if got != ["B", "C", "D"] {
        return Err(Violation::State(format!("expected [B, C, D], got {got:?}")));
    }
    Ok(())
}

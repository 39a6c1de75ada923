//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted or dropped snapshots discard
//! their writes.

use std::future::Future;

use super::{committed_value, set_object_status, TestResult, OBJECT_TABLE};
use crate::record::STATUS_COLUMN;
use crate::LifecycleStorage;

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "begin_and_commit_empty_snapshot",
        begin_and_commit_empty_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "begin_and_abort_empty_snapshot",
        begin_and_abort_empty_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_own_writes",
        snapshot_reads_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_makes_update_invisible",
        abort_makes_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));

    results
}

async fn begin_and_commit_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn begin_and_abort_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[set_object_status(1, 1)])
        .await
        .map_err(|e| e.to_string())?;
    // Snapshot still open.

    let status = committed_value(&s, OBJECT_TABLE, 1, STATUS_COLUMN).await?;
    if status != Some(0) {
        return Err(format!(
            "expected status 0 (uncommitted update invisible), got {status:?}"
        ));
    }

    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn snapshot_reads_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[set_object_status(2, 1)])
        .await
        .map_err(|e| e.to_string())?;
    let rows = s
        .lock_rows(&mut snap, OBJECT_TABLE, super::ID_FIELD, &[2])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match rows.as_slice() {
        [row] if row.id == 2 && row.status == 1 => Ok(()),
        other => Err(format!("expected [2 => status 1], got {other:?}")),
    }
}

async fn abort_makes_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[set_object_status(3, 1)])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let status = committed_value(&s, OBJECT_TABLE, 3, STATUS_COLUMN).await?;
    if status != Some(0) {
        return Err(format!("expected status 0 after abort, got {status:?}"));
    }
    Ok(())
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.execute(&mut snap, &[set_object_status(1, 1)])
            .await
            .map_err(|e| e.to_string())?;
        // Dropped without commit.
    }

    let status = committed_value(&s, OBJECT_TABLE, 1, STATUS_COLUMN).await?;
    if status != Some(0) {
        return Err(format!("expected status 0 after drop, got {status:?}"));
    }

    // The dropped snapshot's row lock must be gone too.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[set_object_status(1, 1)])
        .await
        .map_err(|e| format!("lock not released by drop: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

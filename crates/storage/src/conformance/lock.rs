use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{set_object_status, TestResult, ID_FIELD, OBJECT_TABLE};
use crate::{LifecycleStorage, StatusRow};

/// Upper bound for waits that must not block at all.
const NO_WAIT: Duration = Duration::from_secs(2);

pub(super) async fn run_lock_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "lock",
        "lock_skips_missing_rows",
        lock_skips_missing_rows(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "lock_returns_rows_in_id_order",
        lock_returns_rows_in_id_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "lock_reads_committed_status",
        lock_reads_committed_status(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "contended_lock_waits_for_commit",
        contended_lock_waits_for_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "lock",
        "disjoint_locks_do_not_block",
        disjoint_locks_do_not_block(factory).await,
    ));

    results
}

async fn lock_skips_missing_rows<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = s
        .lock_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1, 99, 3])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    if ids != [1, 3] {
        return Err(format!("expected rows [1, 3], got {ids:?}"));
    }
    Ok(())
}

async fn lock_returns_rows_in_id_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = s
        .lock_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[3, 1, 2])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    if ids != [1, 2, 3] {
        return Err(format!("expected rows in id order, got {ids:?}"));
    }
    Ok(())
}

async fn lock_reads_committed_status<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = s
        .lock_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1, 2])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let expected = vec![StatusRow { id: 1, status: 0 }, StatusRow { id: 2, status: 1 }];
    if rows != expected {
        return Err(format!("expected {expected:?}, got {rows:?}"));
    }
    Ok(())
}

// ── Contention ───────────────────────────────────────────────────────────────

/// A snapshot holding a row lock blocks a second snapshot's locking read of
/// the same row; once the holder commits, the waiter proceeds and sees the
/// committed value.
async fn contended_lock_waits_for_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut holder = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin holder: {e}"))?;
    storage
        .lock_rows(&mut holder, OBJECT_TABLE, ID_FIELD, &[1])
        .await
        .map_err(|e| format!("holder lock: {e}"))?;
    storage
        .execute(&mut holder, &[set_object_status(1, 1)])
        .await
        .map_err(|e| format!("holder update: {e}"))?;

    let s = storage.clone();
    let waiter = tokio::spawn(async move {
        let mut snap = s.begin_snapshot().await?;
        let rows = s.lock_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1]).await;
        let _ = s.abort_snapshot(snap).await;
        rows
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    if waiter.is_finished() {
        return Err("locking read did not wait for the row lock holder".to_string());
    }

    storage
        .commit_snapshot(holder)
        .await
        .map_err(|e| format!("commit holder: {e}"))?;

    let rows = tokio::time::timeout(NO_WAIT, waiter)
        .await
        .map_err(|_| "waiter still blocked after holder committed".to_string())?
        .map_err(|e| format!("task panic: {e}"))?
        .map_err(|e| format!("waiter lock: {e}"))?;

    let expected = vec![StatusRow { id: 1, status: 1 }];
    if rows != expected {
        return Err(format!("expected {expected:?} after commit, got {rows:?}"));
    }
    Ok(())
}

async fn disjoint_locks_do_not_block<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.lock_rows(&mut first, OBJECT_TABLE, ID_FIELD, &[1])
        .await
        .map_err(|e| e.to_string())?;

    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rows = tokio::time::timeout(NO_WAIT, s.lock_rows(&mut second, OBJECT_TABLE, ID_FIELD, &[2]))
        .await
        .map_err(|_| "lock on a different row blocked".to_string())?
        .map_err(|e| e.to_string())?;

    s.abort_snapshot(second).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(first).await.map_err(|e| e.to_string())?;

    if rows.len() != 1 {
        return Err(format!("expected one locked row, got {rows:?}"));
    }
    Ok(())
}

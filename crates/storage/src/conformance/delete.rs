use std::future::Future;

use super::{TestResult, DISCOVERY_TABLE, ID_FIELD, OBJECT_TABLE};
use crate::LifecycleStorage;

pub(super) async fn run_delete_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "delete",
        "delete_applies_at_commit",
        delete_applies_at_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "delete",
        "delete_counts_existing_rows_only",
        delete_counts_existing_rows_only(factory).await,
    ));
    results.push(TestResult::from_result(
        "delete",
        "aborted_delete_keeps_rows",
        aborted_delete_keeps_rows(factory).await,
    ));
    results.push(TestResult::from_result(
        "delete",
        "deleted_row_invisible_to_own_lock",
        deleted_row_invisible_to_own_lock(factory).await,
    ));
    results.push(TestResult::from_result(
        "delete",
        "delete_leaves_other_tables_alone",
        delete_leaves_other_tables_alone(factory).await,
    ));

    results
}

async fn delete_applies_at_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let removed = s
        .delete_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1, 2])
        .await
        .map_err(|e| e.to_string())?;
    if removed != 2 {
        return Err(format!("expected 2 rows removed, got {removed}"));
    }

    let before = s.read_row(OBJECT_TABLE, 1).await.map_err(|e| e.to_string())?;
    if before.is_none() {
        return Err("uncommitted delete visible outside the snapshot".to_string());
    }

    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for id in [1, 2] {
        if s.read_row(OBJECT_TABLE, id)
            .await
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Err(format!("row {id} still present after commit"));
        }
    }
    if s.read_row(OBJECT_TABLE, 3)
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err("row 3 removed but was not requested".to_string());
    }
    Ok(())
}

async fn delete_counts_existing_rows_only<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let removed = s
        .delete_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[2, 42])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if removed != 1 {
        return Err(format!("expected 1 row removed, got {removed}"));
    }
    Ok(())
}

async fn aborted_delete_keeps_rows<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[3])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.read_row(OBJECT_TABLE, 3)
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err("aborted delete removed row 3".to_string());
    }
    Ok(())
}

async fn deleted_row_invisible_to_own_lock<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[2])
        .await
        .map_err(|e| e.to_string())?;
    let rows = s
        .lock_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1, 2])
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    if ids != [1] {
        return Err(format!("expected only row 1 visible, got {ids:?}"));
    }
    Ok(())
}

async fn delete_leaves_other_tables_alone<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_rows(&mut snap, OBJECT_TABLE, ID_FIELD, &[1])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    // Backends with cascading keys may remove the discovery row as well; the
    // fixture has none, so it must survive.
    if s.read_row(DISCOVERY_TABLE, 1)
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err("delete removed a row from an unrelated table".to_string());
    }
    Ok(())
}

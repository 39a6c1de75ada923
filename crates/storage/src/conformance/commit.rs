use std::future::Future;

use super::{
    committed_value, set_object_status, touch_lastcheck, TestResult, DISCOVERY_TABLE,
    FIXTURE_IDS, ID_FIELD, OBJECT_TABLE,
};
use crate::record::STATUS_COLUMN;
use crate::statement::{Assignment, Statement};
use crate::LifecycleStorage;

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "single_update_committed",
        single_update_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_column_update_committed",
        multi_column_update_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "id_list_update_committed",
        id_list_update_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "statements_apply_in_order",
        statements_apply_in_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_table_updates_none_visible_after_abort",
        multi_table_updates_none_visible_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "update_of_missing_row_is_noop",
        update_of_missing_row_is_noop(factory).await,
    ));

    results
}

async fn single_update_committed<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let status = committed_value(&s, OBJECT_TABLE, 1, STATUS_COLUMN).await?;
    if status != Some(1) {
        return Err(format!("expected status 1, got {status:?}"));
    }
    Ok(())
}

async fn multi_column_update_committed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let statement = Statement::SetColumns {
        table: DISCOVERY_TABLE.to_string(),
        id_field: ID_FIELD.to_string(),
        id: 2,
        assignments: vec![
            Assignment::new("lastcheck", 1000),
            Assignment::new("status", 1),
            Assignment::new("ts_delete", 4600),
        ],
    };

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[statement])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let row = s
        .read_row(DISCOVERY_TABLE, 2)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("discovery row 2 missing")?;
    let got = (row.get("lastcheck"), row.get("status"), row.get("ts_delete"));
    if got != (Some(1000), Some(1), Some(4600)) {
        return Err(format!("unexpected columns after commit: {got:?}"));
    }
    if row.get("ts_disable") != Some(0) {
        return Err("unassigned column changed".to_string());
    }
    Ok(())
}

async fn id_list_update_committed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[touch_lastcheck(&FIXTURE_IDS, 2000)])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    for id in FIXTURE_IDS {
        let lastcheck = committed_value(&s, DISCOVERY_TABLE, id, "lastcheck").await?;
        if lastcheck != Some(2000) {
            return Err(format!("expected lastcheck 2000 for {id}, got {lastcheck:?}"));
        }
    }
    Ok(())
}

async fn statements_apply_in_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(
        &mut snap,
        &[
            set_object_status(1, 1),
            set_object_status(1, 0),
            set_object_status(1, 1),
        ],
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let status = committed_value(&s, OBJECT_TABLE, 1, STATUS_COLUMN).await?;
    if status != Some(1) {
        return Err(format!("expected last write (1) to win, got {status:?}"));
    }
    Ok(())
}

async fn multi_table_updates_none_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(
        &mut snap,
        &[set_object_status(1, 1), touch_lastcheck(&[1, 2], 2000)],
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if committed_value(&s, OBJECT_TABLE, 1, STATUS_COLUMN).await? != Some(0) {
        return Err("object update visible after abort".to_string());
    }
    for id in [1, 2] {
        if committed_value(&s, DISCOVERY_TABLE, id, "lastcheck").await? != Some(0) {
            return Err(format!("discovery update for {id} visible after abort"));
        }
    }
    Ok(())
}

async fn update_of_missing_row_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.execute(&mut snap, &[set_object_status(999, 1)])
        .await
        .map_err(|e| format!("update of missing row must not fail: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let row = s
        .read_row(OBJECT_TABLE, 999)
        .await
        .map_err(|e| e.to_string())?;
    if row.is_some() {
        return Err("update created a row".to_string());
    }
    Ok(())
}

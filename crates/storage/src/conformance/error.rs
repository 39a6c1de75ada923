use std::future::Future;

use super::{TestResult, ID_FIELD, OBJECT_TABLE};
use crate::statement::{Assignment, Statement};
use crate::{LifecycleStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "lock_unknown_table",
        lock_unknown_table(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "lock_unknown_id_field",
        lock_unknown_id_field(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "execute_unknown_column",
        execute_unknown_column(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "execute_unknown_table",
        execute_unknown_table(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "read_row_unknown_table",
        read_row_unknown_table(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "read_row_missing_is_none",
        read_row_missing_is_none(factory).await,
    ));

    results
}

async fn lock_unknown_table<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.lock_rows(&mut snap, "no_such_table", ID_FIELD, &[1]).await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::UnknownTable { table }) if table == "no_such_table" => Ok(()),
        Err(StorageError::UnknownTable { table }) => Err(format!(
            "UnknownTable has wrong table: expected 'no_such_table', got '{table}'"
        )),
        Err(e) => Err(format!("expected UnknownTable, got: {e}")),
        Ok(rows) => Err(format!("expected UnknownTable, got Ok({rows:?})")),
    }
}

async fn lock_unknown_id_field<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.lock_rows(&mut snap, OBJECT_TABLE, "no_such_id", &[1]).await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::UnknownColumn { column, .. }) if column == "no_such_id" => Ok(()),
        Err(e) => Err(format!("expected UnknownColumn(no_such_id), got: {e}")),
        Ok(rows) => Err(format!("expected UnknownColumn, got Ok({rows:?})")),
    }
}

async fn execute_unknown_column<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let statement = Statement::SetColumns {
        table: OBJECT_TABLE.to_string(),
        id_field: ID_FIELD.to_string(),
        id: 1,
        assignments: vec![Assignment::new("no_such_column", 1)],
    };

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.execute(&mut snap, &[statement]).await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::UnknownColumn { table, column })
            if table == OBJECT_TABLE && column == "no_such_column" =>
        {
            Ok(())
        }
        Err(e) => Err(format!("expected UnknownColumn, got: {e}")),
        Ok(()) => Err("expected UnknownColumn, got Ok".to_string()),
    }
}

async fn execute_unknown_table<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let statement = Statement::SetColumnForIds {
        table: "no_such_table".to_string(),
        id_field: ID_FIELD.to_string(),
        column: "lastcheck".to_string(),
        value: 1,
        ids: vec![1, 2],
    };

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.execute(&mut snap, &[statement]).await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::UnknownTable { .. }) => Ok(()),
        Err(e) => Err(format!("expected UnknownTable, got: {e}")),
        Ok(()) => Err("expected UnknownTable, got Ok".to_string()),
    }
}

async fn read_row_unknown_table<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.read_row("no_such_table", 1).await {
        Err(StorageError::UnknownTable { .. }) => Ok(()),
        Err(e) => Err(format!("expected UnknownTable, got: {e}")),
        Ok(row) => Err(format!("expected UnknownTable, got Ok({row:?})")),
    }
}

async fn read_row_missing_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LifecycleStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.read_row(OBJECT_TABLE, 404).await {
        Ok(None) => Ok(()),
        Ok(Some(row)) => Err(format!("expected no row, got {row:?}")),
        Err(e) => Err(format!("expected Ok(None), got: {e}")),
    }
}

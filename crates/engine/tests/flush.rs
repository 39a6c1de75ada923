use std::sync::Arc;
use std::time::Duration;

use lapse_core::{
    on_confirmed, on_lost, on_lost_should_disable, on_reenable, Change, DisableSource,
    DiscoveryStatus, DiscoveryStore, LifetimePolicy, ObjectStatus,
};
use lapse_engine::{
    flush_discoveries, AuditAction, AuditContext, AuditEntry, FlushConfig, FlushError,
    ObjectKind, TableHandler, DISCOVERY_CREATED,
};
use lapse_storage::conformance::{DISCOVERY_COLUMNS, DISCOVERY_TABLE, ID_FIELD, OBJECT_TABLE};
use lapse_storage::{LifecycleStorage, MemoryStorage, Row, StorageError, STATUS_COLUMN};

const NOW: i64 = 2000;

fn kind() -> ObjectKind {
    ObjectKind::new("object", ID_FIELD, DISCOVERY_TABLE).with_object_table(OBJECT_TABLE)
}

/// Object rows as `(id, status)`; one discovery row per object, overridden by
/// `discovery` where given.
fn storage_with(objects: &[(u64, i64)], discovery: &[Row]) -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage
        .create_table(OBJECT_TABLE, ID_FIELD, &[STATUS_COLUMN])
        .unwrap();
    storage
        .create_table(DISCOVERY_TABLE, ID_FIELD, &DISCOVERY_COLUMNS)
        .unwrap();

    for &(id, status) in objects {
        storage
            .insert_row(OBJECT_TABLE, Row::new(id).with(STATUS_COLUMN, status))
            .unwrap();
        let row = discovery
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .unwrap_or_else(|| Row::new(id));
        storage.insert_row(DISCOVERY_TABLE, row).unwrap();
    }
    storage
}

async fn column(storage: &MemoryStorage, table: &str, id: u64, column: &str) -> Option<i64> {
    storage
        .read_row(table, id)
        .await
        .unwrap()
        .and_then(|row| row.get(column))
}

// ── No-op flushes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_store_opens_no_snapshot() {
    let storage = storage_with(&[(1, 0)], &[]);
    let handler = TableHandler::new(kind());

    let report = flush_discoveries(
        &storage,
        &handler,
        &kind(),
        DiscoveryStore::new(),
        NOW,
        &FlushConfig::default(),
    )
    .await
    .unwrap();

    assert!(report.is_noop());
    assert_eq!(storage.snapshots_begun(), 0);
}

#[tokio::test]
async fn inert_and_delete_only_records_open_no_snapshot() {
    let storage = storage_with(&[(1, 0), (2, 0)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    store.add(1, "one");
    store.add(2, "two").stage(Change::Delete);

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert!(report.is_noop());
    assert_eq!(storage.snapshots_begun(), 0);
    assert!(handler.audit_trail().is_empty());
    assert!(storage.read_row(OBJECT_TABLE, 2).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_only_record_is_deleted_when_other_work_opens_the_snapshot() {
    let storage = storage_with(&[(1, 0), (2, 0)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    store.add(1, "one").stage(Change::Delete);
    store.add(2, "two").stage(Change::Lastcheck);

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert!(report.transaction_opened);
    assert_eq!(report.deleted, vec![1]);
    assert_eq!(report.touched, vec![2]);
    assert!(report.status_updates.is_empty());
    assert!(report.field_updates.is_empty());
    assert_eq!(report.statements, 1);

    assert_eq!(
        storage.statement_log(),
        vec![
            "delete from object_discovery where objectid=1;",
            "delete from objects where objectid=1;",
            "update object_discovery set lastcheck=2000 where objectid=2;",
        ]
    );
    assert!(storage.read_row(OBJECT_TABLE, 1).await.unwrap().is_none());
    assert!(storage.read_row(DISCOVERY_TABLE, 1).await.unwrap().is_none());
    assert_eq!(column(&storage, DISCOVERY_TABLE, 2, "lastcheck").await, Some(NOW));
    assert_eq!(storage.commits(), 1);

    assert_eq!(
        handler.audit_trail().entries(),
        vec![AuditEntry::Object {
            context: AuditContext::Discovery,
            action: AuditAction::Delete,
            id: 1,
            name: "one".to_string(),
            flags: DISCOVERY_CREATED,
        }]
    );
}

#[tokio::test]
async fn missing_object_table_fails_before_any_storage_access() {
    let storage = storage_with(&[(1, 0)], &[]);
    let kind = ObjectKind::new("graph", ID_FIELD, DISCOVERY_TABLE);
    let handler = TableHandler::new(kind.clone());

    let mut store = DiscoveryStore::new();
    on_reenable(
        store.add(1, "one"),
        ObjectStatus::Disabled,
        DisableSource::LostDiscovery,
        0,
    );

    let err = flush_discoveries(&storage, &handler, &kind, store, NOW, &FlushConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FlushError::MissingObjectTable { ref kind } if kind == "graph"));
    assert_eq!(storage.snapshots_begun(), 0);
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn confirmed_object_clears_lost_state() {
    let storage = storage_with(
        &[(5, 0)],
        &[Row::new(5).with("status", 1).with("ts_delete", 120)],
    );
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    on_confirmed(store.add(5, "five"), DiscoveryStatus::Lost, 120);

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert!(report.transaction_opened);
    assert_eq!(report.field_updates, vec![5]);
    assert_eq!(report.statements, 1);
    assert_eq!(
        storage.statement_log(),
        vec!["update object_discovery set lastcheck=2000,status=0,ts_delete=0 where objectid=5;"]
    );
    assert_eq!(column(&storage, DISCOVERY_TABLE, 5, "lastcheck").await, Some(NOW));
    assert_eq!(column(&storage, DISCOVERY_TABLE, 5, "status").await, Some(0));
    assert_eq!(column(&storage, DISCOVERY_TABLE, 5, "ts_delete").await, Some(0));
    assert_eq!(storage.commits(), 1);
}

#[tokio::test]
async fn elapsed_lost_object_is_deleted_and_nothing_else_written() {
    let storage = storage_with(&[(1, 0), (2, 0)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    let lost = store.add(1, "one");
    on_lost(
        lost,
        ObjectStatus::Enabled,
        1000,
        NOW,
        &LifetimePolicy::immediately(),
        DiscoveryStatus::Normal,
        DisableSource::Default,
        0,
    );
    // Stale status change on the same object: must not be written.
    lost.object_status = ObjectStatus::Disabled;
    lost.stage(Change::ObjectStatus);
    assert!(lost.has(Change::Delete));

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![1]);
    assert!(report.status_updates.is_empty());
    assert!(report.field_updates.is_empty());
    assert_eq!(report.statements, 0);

    assert_eq!(
        storage.statement_log(),
        vec![
            "select objectid,status from objects where objectid=1 for update",
            "delete from object_discovery where objectid=1;",
            "delete from objects where objectid=1;",
        ]
    );
    assert!(storage.read_row(OBJECT_TABLE, 1).await.unwrap().is_none());
    assert!(storage.read_row(DISCOVERY_TABLE, 1).await.unwrap().is_none());
    assert!(storage.read_row(OBJECT_TABLE, 2).await.unwrap().is_some());

    assert_eq!(
        handler.audit_trail().entries(),
        vec![AuditEntry::Object {
            context: AuditContext::Discovery,
            action: AuditAction::Delete,
            id: 1,
            name: "one".to_string(),
            flags: DISCOVERY_CREATED,
        }]
    );
}

#[tokio::test]
async fn never_policy_keeps_lost_object() {
    let storage = storage_with(&[(4, 0)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    on_lost(
        store.add(4, "four"),
        ObjectStatus::Enabled,
        1000,
        i64::from(i32::MAX),
        &LifetimePolicy::never(),
        DiscoveryStatus::Normal,
        DisableSource::Default,
        0,
    );

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(report.field_updates, vec![4]);
    assert_eq!(
        storage.statement_log(),
        vec!["update object_discovery set status=1 where objectid=4;"]
    );
}

#[tokio::test]
async fn reenabled_object_writes_status_and_audits_transition() {
    let storage = storage_with(
        &[(3, 1)],
        &[Row::new(3).with("disable_source", 1).with("ts_disable", 1500)],
    );
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    on_reenable(
        store.add(3, "three"),
        ObjectStatus::Disabled,
        DisableSource::LostDiscovery,
        1500,
    );

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert_eq!(report.status_updates, vec![3]);
    assert_eq!(report.field_updates, vec![3]);
    assert_eq!(report.statements, 2);
    assert_eq!(
        storage.statement_log(),
        vec![
            "select objectid,status from objects where objectid=3 for update",
            "update objects set status=0 where objectid=3;",
            "update object_discovery set disable_source=0,ts_disable=0 where objectid=3;",
        ]
    );
    assert_eq!(column(&storage, OBJECT_TABLE, 3, STATUS_COLUMN).await, Some(0));

    assert_eq!(
        handler.audit_trail().entries(),
        vec![
            AuditEntry::Object {
                context: AuditContext::Discovery,
                action: AuditAction::Update,
                id: 3,
                name: "three".to_string(),
                flags: DISCOVERY_CREATED,
            },
            AuditEntry::StatusChange {
                context: AuditContext::Discovery,
                id: 3,
                flags: DISCOVERY_CREATED,
                old: 1,
                new: 0,
            },
        ]
    );
}

// ── Verification under lock ─────────────────────────────────────────────────

#[tokio::test]
async fn status_already_in_storage_is_not_rewritten() {
    // Someone else disabled object 2 after the run read it as enabled.
    let storage = storage_with(&[(2, 1)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    on_lost_should_disable(
        store.add(2, "two"),
        ObjectStatus::Enabled,
        1000,
        NOW,
        &LifetimePolicy::immediately(),
        0,
    );

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert_eq!(report.verified_unchanged, vec![2]);
    assert!(report.status_updates.is_empty());
    assert_eq!(report.field_updates, vec![2]);
    assert_eq!(
        storage.statement_log(),
        vec![
            "select objectid,status from objects where objectid=2 for update",
            "update object_discovery set disable_source=1,ts_disable=1 where objectid=2;",
        ]
    );
    assert!(handler.audit_trail().is_empty());
}

#[tokio::test]
async fn vanished_object_contributes_no_writes() {
    let storage = storage_with(&[(1, 0)], &[]);
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    let gone = store.add(9, "nine");
    gone.object_status = ObjectStatus::Disabled;
    gone.stage(Change::ObjectStatus);
    gone.stage(Change::Lastcheck);
    gone.ts_delete = 4600;
    gone.stage(Change::TsDelete);
    store.add(1, "one").stage(Change::Lastcheck);

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap();

    assert_eq!(report.dropped, vec![9]);
    assert_eq!(report.touched, vec![1]);
    assert!(report.field_updates.is_empty());
    assert_eq!(
        storage.statement_log(),
        vec![
            "select objectid,status from objects where objectid=9 for update",
            "update object_discovery set lastcheck=2000 where objectid=1;",
        ]
    );
    assert!(handler.audit_trail().is_empty());
}

#[tokio::test]
async fn concurrent_removal_drops_staged_status() {
    let storage = Arc::new(storage_with(&[(1, 0)], &[]));

    // Another writer is deleting object 1 and holds its row lock.
    let mut remover = storage.begin_snapshot().await.unwrap();
    storage
        .delete_rows(&mut remover, OBJECT_TABLE, ID_FIELD, &[1])
        .await
        .unwrap();

    let flush = {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let kind = kind();
            let handler = TableHandler::new(kind.clone());
            let mut store = DiscoveryStore::new();
            let record = store.add(1, "one");
            record.object_status = ObjectStatus::Disabled;
            record.stage(Change::ObjectStatus);
            record.stage(Change::Lastcheck);

            flush_discoveries(&*storage, &handler, &kind, store, NOW, &FlushConfig::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!flush.is_finished(), "flush did not wait for the row lock");

    storage.commit_snapshot(remover).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(2), flush)
        .await
        .expect("flush still blocked after the remover committed")
        .unwrap()
        .unwrap();

    assert_eq!(report.dropped, vec![1]);
    assert!(report.status_updates.is_empty());
    assert!(report.touched.is_empty());
    assert_eq!(report.statements, 0);
}

// ── Batching and ordering ───────────────────────────────────────────────────

#[tokio::test]
async fn writes_are_sorted_and_touches_chunked() {
    let objects: Vec<(u64, i64)> = (1..=6).map(|id| (id, 0)).collect();
    let storage = storage_with(&objects, &[]);
    let handler = TableHandler::new(kind());
    let config = FlushConfig {
        id_batch_size: 2,
        ..FlushConfig::default()
    };

    let mut store = DiscoveryStore::new();
    for id in [6, 2, 4] {
        store.add(id, "touched").stage(Change::Lastcheck);
    }
    for id in [5, 1, 3] {
        on_confirmed(store.add(id, "confirmed"), DiscoveryStatus::Lost, 0);
    }

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &config)
        .await
        .unwrap();

    assert_eq!(report.field_updates, vec![1, 3, 5]);
    assert_eq!(report.touched, vec![2, 4, 6]);
    assert_eq!(report.statements, 5);
    assert_eq!(
        storage.statement_log(),
        vec![
            "update object_discovery set lastcheck=2000,status=0 where objectid=1;",
            "update object_discovery set lastcheck=2000,status=0 where objectid=3;",
            "update object_discovery set lastcheck=2000,status=0 where objectid=5;",
            "update object_discovery set lastcheck=2000 where objectid in (2,4);",
            "update object_discovery set lastcheck=2000 where objectid=6;",
        ]
    );
    for id in 1..=6 {
        assert_eq!(column(&storage, DISCOVERY_TABLE, id, "lastcheck").await, Some(NOW));
    }

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["touched"], serde_json::json!([2, 4, 6]));
    assert_eq!(json["transaction_opened"], true);
}

#[tokio::test]
async fn small_batches_produce_the_same_sql() {
    let storage = storage_with(&[(1, 1), (2, 1), (3, 1)], &[]);
    let handler = TableHandler::new(kind());
    let config = FlushConfig {
        max_batch_bytes: 1,
        ..FlushConfig::default()
    };

    let mut store = DiscoveryStore::new();
    for (id, name) in [(3, "three"), (1, "one"), (2, "two")] {
        on_reenable(
            store.add(id, name),
            ObjectStatus::Disabled,
            DisableSource::LostDiscovery,
            0,
        );
    }

    let report = flush_discoveries(&storage, &handler, &kind(), store, NOW, &config)
        .await
        .unwrap();

    assert_eq!(report.status_updates, vec![1, 2, 3]);
    assert_eq!(report.statements, 6);
    let log = storage.statement_log();
    assert_eq!(log[0], "select objectid,status from objects where objectid in (1,2,3) for update");
    assert_eq!(log[1], "update objects set status=0 where objectid=1;");
    assert_eq!(log[3], "update objects set status=0 where objectid=3;");
    assert_eq!(log[4], "update object_discovery set disable_source=0 where objectid=1;");
    assert_eq!(log.len(), 7);
}

// ── Rollback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_write_rolls_back_the_whole_flush() {
    let storage = storage_with(&[(1, 1), (2, 0)], &[Row::new(2).with("ts_delete", 120)]);
    storage.fail_writes_to(DISCOVERY_TABLE).unwrap();
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    let one = store.add(1, "one");
    one.object_status = ObjectStatus::Enabled;
    one.stage(Change::ObjectStatus);
    on_confirmed(store.add(2, "two"), DiscoveryStatus::Normal, 120);

    let err = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FlushError::Storage(StorageError::Backend(_))), "{err}");
    assert_eq!(storage.commits(), 0);
    assert_eq!(storage.rollbacks(), 1);
    assert!(storage.statement_log().is_empty());
    assert_eq!(column(&storage, OBJECT_TABLE, 1, STATUS_COLUMN).await, Some(1));
    assert_eq!(column(&storage, DISCOVERY_TABLE, 2, "ts_delete").await, Some(120));
}

#[tokio::test]
async fn failed_delete_names_the_kind() {
    let storage = storage_with(&[(1, 0)], &[]);
    storage.fail_writes_to(DISCOVERY_TABLE).unwrap();
    let handler = TableHandler::new(kind());

    let mut store = DiscoveryStore::new();
    on_lost(
        store.add(1, "one"),
        ObjectStatus::Enabled,
        1000,
        NOW,
        &LifetimePolicy::immediately(),
        DiscoveryStatus::Normal,
        DisableSource::Default,
        0,
    );

    let err = flush_discoveries(&storage, &handler, &kind(), store, NOW, &FlushConfig::default())
        .await
        .unwrap_err();

    match err {
        FlushError::Delete { kind, source } => {
            assert_eq!(kind, "object");
            assert!(matches!(source, StorageError::Backend(_)));
        }
        other => panic!("expected Delete error, got {other:?}"),
    }
    assert_eq!(storage.rollbacks(), 1);
    assert!(storage.read_row(OBJECT_TABLE, 1).await.unwrap().is_some());
}

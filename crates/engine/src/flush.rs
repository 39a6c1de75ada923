//! End-of-run reconciliation of a [`DiscoveryStore`] against storage.
//!
//! [`flush_discoveries`] writes every staged change of one run in a single
//! snapshot:
//!
//! 1. Count records with work to do. With none, return without opening a
//!    snapshot.
//! 2. Begin the snapshot.
//! 3. Lock the object rows of staged status updates and re-check them. A
//!    status already in storage is not written again; a row that has
//!    disappeared drops every staged change of its record.
//! 4. Partition records into deletes, status updates, field updates and
//!    touches (`lastcheck` only). A staged deletion overrides everything else
//!    for its record.
//! 5. Delete, then write statuses, then discovery-record fields, then touches.
//!    Every batch is in ascending id order.
//! 6. Commit. Any error rolls the snapshot back before it is returned.

use serde::Serialize;
use tracing::{debug, debug_span, warn, Instrument};

use lapse_core::{Change, ChangeSet, DiscoveryRecord, DiscoveryStore, PendingChange, Timestamp};
use lapse_storage::{Assignment, LifecycleStorage, Statement, STATUS_COLUMN};

use crate::config::FlushConfig;
use crate::error::FlushError;
use crate::kind::{AuditAction, AuditContext, ObjectKind, ObjectKindHandler, DISCOVERY_CREATED};
use crate::writer::BatchWriter;

/// What a flush did. All id lists are in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// False when there was nothing to write and no snapshot was opened.
    pub transaction_opened: bool,
    pub deleted: Vec<u64>,
    /// Object-table status writes.
    pub status_updates: Vec<u64>,
    /// Discovery-record writes of more than `lastcheck`.
    pub field_updates: Vec<u64>,
    /// Discovery records whose `lastcheck` alone was refreshed.
    pub touched: Vec<u64>,
    /// Records dropped because their object row no longer existed.
    pub dropped: Vec<u64>,
    /// Status writes skipped because storage already held the staged status.
    pub verified_unchanged: Vec<u64>,
    /// Update statements executed.
    pub statements: usize,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        !self.transaction_opened
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> Timestamp {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Write the staged changes of one discovery run for one object kind.
///
/// `now` becomes the `lastcheck` of every refreshed discovery record. The
/// store is consumed: whatever the outcome, a new run starts from a new
/// store.
///
/// # Errors
///
/// [`FlushError::MissingObjectTable`] if status updates are staged for a kind
/// without an object table (checked before any storage access). Any storage
/// or delete failure after the snapshot was opened rolls it back and is
/// returned as is.
pub async fn flush_discoveries<S, H>(
    storage: &S,
    handler: &H,
    kind: &ObjectKind,
    store: DiscoveryStore<'_>,
    now: Timestamp,
    config: &FlushConfig,
) -> Result<FlushReport, FlushError>
where
    S: LifecycleStorage,
    H: ObjectKindHandler<S> + ?Sized,
{
    let span = debug_span!("flush_discoveries", kind = %kind.name, records = store.len());
    let flush = Flush {
        storage,
        handler,
        kind,
        now,
        config,
    };
    flush.run(store).instrument(span).await
}

struct Flush<'r, S: LifecycleStorage, H: ?Sized> {
    storage: &'r S,
    handler: &'r H,
    kind: &'r ObjectKind,
    now: Timestamp,
    config: &'r FlushConfig,
}

/// Records sorted into the write batches of step 4.
#[derive(Default)]
struct Batches<'s, 'a> {
    deletes: Vec<u64>,
    status: Vec<&'s DiscoveryRecord<'a>>,
    fields: Vec<&'s DiscoveryRecord<'a>>,
    touch: Vec<u64>,
}

impl<'r, S, H> Flush<'r, S, H>
where
    S: LifecycleStorage,
    H: ObjectKindHandler<S> + ?Sized,
{
    async fn run(&self, mut store: DiscoveryStore<'_>) -> Result<FlushReport, FlushError> {
        let mut verify_ids = Vec::new();
        let mut updates = 0usize;
        for record in store.iter() {
            if !record.has_updates() {
                continue;
            }
            if record.has(Change::ObjectStatus) {
                verify_ids.push(record.id);
            }
            updates += 1;
        }

        if updates == 0 {
            debug!("no staged updates, nothing to flush");
            return Ok(FlushReport::default());
        }
        if !verify_ids.is_empty() && self.kind.object_table.is_none() {
            return Err(FlushError::MissingObjectTable {
                kind: self.kind.name.clone(),
            });
        }

        debug!(updates, to_verify = verify_ids.len(), "flushing staged updates");

        let mut snapshot = self.storage.begin_snapshot().await?;
        match self.apply(&mut snapshot, &mut store, verify_ids).await {
            Ok(report) => {
                self.storage.commit_snapshot(snapshot).await?;
                debug!(
                    deleted = report.deleted.len(),
                    status_updates = report.status_updates.len(),
                    field_updates = report.field_updates.len(),
                    touched = report.touched.len(),
                    dropped = report.dropped.len(),
                    statements = report.statements,
                    "flush committed"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(abort_err) = self.storage.abort_snapshot(snapshot).await {
                    warn!(error = %abort_err, "rolling back failed flush also failed");
                }
                debug!(error = %err, "flush rolled back");
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        snapshot: &mut S::Snapshot,
        store: &mut DiscoveryStore<'_>,
        mut verify_ids: Vec<u64>,
    ) -> Result<FlushReport, FlushError> {
        let mut report = FlushReport {
            transaction_opened: true,
            ..FlushReport::default()
        };

        if !verify_ids.is_empty() {
            verify_ids.sort_unstable();
            self.verify(snapshot, store, &verify_ids, &mut report).await?;
        }

        let batches = self.partition(store);

        if !batches.deletes.is_empty() {
            self.handler
                .delete_objects(self.storage, snapshot, &batches.deletes, AuditContext::Discovery)
                .await
                .map_err(|source| FlushError::Delete {
                    kind: self.kind.name.clone(),
                    source,
                })?;
        }

        let mut writer = BatchWriter::new(self.storage, self.config);
        self.write_statuses(snapshot, &mut writer, &batches.status).await?;
        self.write_fields(snapshot, &mut writer, &batches.fields).await?;
        report.statements = writer.finish(snapshot).await?;
        report.statements += self.write_touches(snapshot, &batches.touch).await?;

        report.deleted = batches.deletes;
        report.status_updates = batches.status.iter().map(|r| r.id).collect();
        report.field_updates = batches.fields.iter().map(|r| r.id).collect();
        report.touched = batches.touch;
        Ok(report)
    }

    /// Lock the object rows behind `ids` and reconcile the staged status
    /// updates with what storage holds.
    async fn verify(
        &self,
        snapshot: &mut S::Snapshot,
        store: &mut DiscoveryStore<'_>,
        ids: &[u64],
        report: &mut FlushReport,
    ) -> Result<(), FlushError> {
        let Some(table) = self.kind.object_table.as_deref() else {
            return Err(FlushError::MissingObjectTable {
                kind: self.kind.name.clone(),
            });
        };

        let rows = self
            .storage
            .lock_rows(snapshot, table, &self.kind.id_field, ids)
            .await?;

        for row in rows {
            let Some(record) = store.get_mut(row.id) else {
                warn!(id = row.id, "locked object has no discovery record");
                continue;
            };

            record.stage(Change::ObjectExists);
            if record.has(Change::ObjectStatus)
                && row.status == self.handler.map_status(record.object_status)
            {
                record.changes.remove(Change::ObjectStatus);
                report.verified_unchanged.push(row.id);
            }
        }

        for &id in ids {
            let Some(record) = store.get_mut(id) else {
                warn!(id, "verified id has no discovery record");
                continue;
            };
            if !record.has(Change::ObjectExists) {
                debug!(id, "object removed concurrently, dropping its staged changes");
                record.changes.clear();
                report.dropped.push(id);
            }
        }

        report.verified_unchanged.sort_unstable();
        Ok(())
    }

    fn partition<'s, 'a>(&self, store: &'s DiscoveryStore<'a>) -> Batches<'s, 'a> {
        let mut batches = Batches::default();

        for id in store.ids_sorted() {
            let Some(record) = store.get(id) else {
                continue;
            };

            match record.pending() {
                PendingChange::NoChange => {}
                PendingChange::Delete => {
                    self.handler.audit_create(
                        AuditContext::Discovery,
                        AuditAction::Delete,
                        record.id,
                        record.name,
                        DISCOVERY_CREATED,
                    );
                    batches.deletes.push(record.id);
                }
                PendingChange::Fields(changes) => {
                    if changes.contains(Change::ObjectStatus) {
                        batches.status.push(record);
                    }
                    if changes.intersects(ChangeSet::DISCOVERY_FIELDS) {
                        batches.fields.push(record);
                    } else if changes.is_touch_only() {
                        batches.touch.push(record.id);
                    }
                }
            }
        }

        batches
    }

    async fn write_statuses(
        &self,
        snapshot: &mut S::Snapshot,
        writer: &mut BatchWriter<'_, S>,
        records: &[&DiscoveryRecord<'_>],
    ) -> Result<(), FlushError> {
        if records.is_empty() {
            return Ok(());
        }
        let Some(table) = self.kind.object_table.as_deref() else {
            return Err(FlushError::MissingObjectTable {
                kind: self.kind.name.clone(),
            });
        };

        for record in records {
            let new = self.handler.map_status(record.object_status);
            writer
                .push(
                    snapshot,
                    Statement::SetColumns {
                        table: table.to_string(),
                        id_field: self.kind.id_field.clone(),
                        id: record.id,
                        assignments: vec![Assignment::new(STATUS_COLUMN, new)],
                    },
                )
                .await?;

            // The previous status is the inverse of the written one.
            let old = self.handler.map_status(record.object_status.inverse());
            self.handler.audit_create(
                AuditContext::Discovery,
                AuditAction::Update,
                record.id,
                record.name,
                DISCOVERY_CREATED,
            );
            self.handler.audit_update_status(
                AuditContext::Discovery,
                record.id,
                DISCOVERY_CREATED,
                old,
                new,
            );
        }
        Ok(())
    }

    async fn write_fields(
        &self,
        snapshot: &mut S::Snapshot,
        writer: &mut BatchWriter<'_, S>,
        records: &[&DiscoveryRecord<'_>],
    ) -> Result<(), FlushError> {
        for record in records {
            writer
                .push(
                    snapshot,
                    Statement::SetColumns {
                        table: self.kind.discovery_table.clone(),
                        id_field: self.kind.id_field.clone(),
                        id: record.id,
                        assignments: self.field_assignments(record),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Staged discovery-record columns, in column order.
    fn field_assignments(&self, record: &DiscoveryRecord<'_>) -> Vec<Assignment> {
        let mut assignments = Vec::with_capacity(5);
        if record.has(Change::Lastcheck) {
            assignments.push(Assignment::new("lastcheck", self.now));
        }
        if record.has(Change::DiscoveryStatus) {
            assignments.push(Assignment::new("status", record.discovery_status.code()));
        }
        if record.has(Change::DisableSource) {
            assignments.push(Assignment::new("disable_source", record.disable_source.code()));
        }
        if record.has(Change::TsDelete) {
            assignments.push(Assignment::new("ts_delete", record.ts_delete));
        }
        if record.has(Change::TsDisable) {
            assignments.push(Assignment::new("ts_disable", record.ts_disable));
        }
        assignments
    }

    /// Refresh `lastcheck` of `ids`, `id_batch_size` ids per statement.
    async fn write_touches(
        &self,
        snapshot: &mut S::Snapshot,
        ids: &[u64],
    ) -> Result<usize, FlushError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let statements: Vec<Statement> = ids
            .chunks(self.config.id_batch_size.max(1))
            .map(|chunk| Statement::SetColumnForIds {
                table: self.kind.discovery_table.clone(),
                id_field: self.kind.id_field.clone(),
                column: "lastcheck".to_string(),
                value: self.now,
                ids: chunk.to_vec(),
            })
            .collect();

        self.storage.execute(snapshot, &statements).await?;
        Ok(statements.len())
    }
}

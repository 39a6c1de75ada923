//! Object kinds and their per-kind collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lapse_core::ObjectStatus;
use lapse_storage::{LifecycleStorage, StorageError};

use crate::audit::{AuditEntry, AuditTrail};

/// Audit source flag marking objects created by discovery.
pub const DISCOVERY_CREATED: u32 = 0x04;

/// Where an audit entry originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditContext {
    /// Written by a discovery run's flush.
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Update,
    Delete,
}

/// Table layout of one object kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKind {
    /// Used in logs and errors.
    pub name: String,
    /// Id column shared by the object table and the discovery-record table.
    pub id_field: String,
    /// Table holding the object's own `status` column. `None` for kinds whose
    /// status is not reconciled.
    pub object_table: Option<String>,
    pub discovery_table: String,
}

impl ObjectKind {
    pub fn new(name: &str, id_field: &str, discovery_table: &str) -> Self {
        ObjectKind {
            name: name.to_string(),
            id_field: id_field.to_string(),
            object_table: None,
            discovery_table: discovery_table.to_string(),
        }
    }

    pub fn with_object_table(mut self, table: &str) -> Self {
        self.object_table = Some(table.to_string());
        self
    }
}

/// The collaborators the flush needs for one object kind.
///
/// The audit methods default to doing nothing, for kinds whose changes are
/// not audited.
#[async_trait]
pub trait ObjectKindHandler<S: LifecycleStorage>: Send + Sync {
    /// Storage encoding of an object status for this kind.
    fn map_status(&self, status: ObjectStatus) -> i64;

    /// Remove the objects with the given ids, in ascending order, together
    /// with their discovery records and any dependent data.
    ///
    /// Ids may refer to objects that are already gone. Any error aborts the
    /// flush and rolls back the snapshot.
    async fn delete_objects(
        &self,
        storage: &S,
        snapshot: &mut S::Snapshot,
        ids: &[u64],
        context: AuditContext,
    ) -> Result<(), StorageError>;

    fn audit_create(
        &self,
        _context: AuditContext,
        _action: AuditAction,
        _id: u64,
        _name: &str,
        _flags: u32,
    ) {
    }

    fn audit_update_status(
        &self,
        _context: AuditContext,
        _id: u64,
        _flags: u32,
        _old: i64,
        _new: i64,
    ) {
    }
}

/// Storage codes of the two object statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodes {
    pub enabled: i64,
    pub disabled: i64,
}

impl Default for StatusCodes {
    /// Enabled = 0, Disabled = 1.
    fn default() -> Self {
        StatusCodes {
            enabled: 0,
            disabled: 1,
        }
    }
}

impl StatusCodes {
    pub const fn code(&self, status: ObjectStatus) -> i64 {
        match status {
            ObjectStatus::Enabled => self.enabled,
            ObjectStatus::Disabled => self.disabled,
        }
    }
}

/// Handler for kinds whose objects live in plain tables: deletes remove the
/// discovery record and then the object row, audit events go to an
/// [`AuditTrail`].
#[derive(Debug, Clone)]
pub struct TableHandler {
    kind: ObjectKind,
    codes: StatusCodes,
    audit: AuditTrail,
}

impl TableHandler {
    pub fn new(kind: ObjectKind) -> Self {
        TableHandler {
            kind,
            codes: StatusCodes::default(),
            audit: AuditTrail::new(),
        }
    }

    pub fn with_status_codes(mut self, codes: StatusCodes) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_audit_trail(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }
}

#[async_trait]
impl<S: LifecycleStorage> ObjectKindHandler<S> for TableHandler {
    fn map_status(&self, status: ObjectStatus) -> i64 {
        self.codes.code(status)
    }

    async fn delete_objects(
        &self,
        storage: &S,
        snapshot: &mut S::Snapshot,
        ids: &[u64],
        _context: AuditContext,
    ) -> Result<(), StorageError> {
        storage
            .delete_rows(snapshot, &self.kind.discovery_table, &self.kind.id_field, ids)
            .await?;
        if let Some(table) = &self.kind.object_table {
            storage
                .delete_rows(snapshot, table, &self.kind.id_field, ids)
                .await?;
        }
        Ok(())
    }

    fn audit_create(
        &self,
        context: AuditContext,
        action: AuditAction,
        id: u64,
        name: &str,
        flags: u32,
    ) {
        self.audit.record(AuditEntry::Object {
            context,
            action,
            id,
            name: name.to_string(),
            flags,
        });
    }

    fn audit_update_status(&self, context: AuditContext, id: u64, flags: u32, old: i64, new: i64) {
        self.audit.record(AuditEntry::StatusChange {
            context,
            id,
            flags,
            old,
            new,
        });
    }
}

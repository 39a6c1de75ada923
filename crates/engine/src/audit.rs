//! Recorded audit entries.
//!
//! The flush reports audit events through [`ObjectKindHandler`]; handlers
//! that keep their audit log in memory (tests, dry runs, drivers that ship
//! the log elsewhere after commit) can hand the events to an [`AuditTrail`].
//!
//! [`ObjectKindHandler`]: crate::ObjectKindHandler

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::kind::{AuditAction, AuditContext};

/// One audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum AuditEntry {
    /// Top-level entry for an object being updated or deleted.
    Object {
        context: AuditContext,
        action: AuditAction,
        id: u64,
        name: String,
        flags: u32,
    },
    /// Before/after values of a status write, in storage encoding.
    StatusChange {
        context: AuditContext,
        id: u64,
        flags: u32,
        old: i64,
        new: i64,
    },
}

impl AuditEntry {
    pub fn id(&self) -> u64 {
        match self {
            AuditEntry::Object { id, .. } | AuditEntry::StatusChange { id, .. } => *id,
        }
    }
}

/// Thread-safe, cloneable list of [`AuditEntry`] values. Clones share the
/// same list.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: AuditEntry) {
        self.lock().push(entry);
    }

    /// Entries in the order they were recorded.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Entries recorded for one object.
    pub fn entries_for(&self, id: u64) -> Vec<AuditEntry> {
        self.lock().iter().filter(|e| e.id() == id).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<AuditEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.lock()
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect(),
        )
    }

    // Poisoning is ignored: entries are plain values.
    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Per-run discovery records.
//!
//! A [`DiscoveryStore`] is created at the start of a discovery run, gets one
//! record per object the run considers, and is consumed by the flush at the
//! end of the run. Nothing in it outlives the run.

use std::collections::hash_map::{self, Entry};
use std::collections::HashMap;

use crate::change::{Change, ChangeSet, PendingChange};
use crate::lifetime::{Timestamp, TS_NONE};
use crate::status::{DisableSource, DiscoveryStatus, ObjectStatus};

/// Staged changes for one object.
///
/// The value fields are only meaningful when the matching [`Change`] is in
/// `changes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord<'a> {
    pub id: u64,
    /// Display name, used for audit entries only.
    pub name: &'a str,
    pub changes: ChangeSet,
    pub discovery_status: DiscoveryStatus,
    pub object_status: ObjectStatus,
    pub disable_source: DisableSource,
    pub ts_delete: Timestamp,
    pub ts_disable: Timestamp,
}

impl<'a> DiscoveryRecord<'a> {
    pub fn new(id: u64, name: &'a str) -> Self {
        DiscoveryRecord {
            id,
            name,
            changes: ChangeSet::EMPTY,
            discovery_status: DiscoveryStatus::Normal,
            object_status: ObjectStatus::Enabled,
            disable_source: DisableSource::Default,
            ts_delete: TS_NONE,
            ts_disable: TS_NONE,
        }
    }

    pub fn has(&self, change: Change) -> bool {
        self.changes.contains(change)
    }

    pub fn stage(&mut self, change: Change) {
        self.changes.insert(change);
    }

    pub fn pending(&self) -> PendingChange {
        self.changes.resolve()
    }

    /// Not written or read again during the run.
    pub fn is_inert(&self) -> bool {
        self.changes.is_empty()
    }

    /// Has staged work that makes a flush open a snapshot: anything beyond
    /// an empty set or a lone [`Change::Delete`]. A lone delete is still
    /// carried out when other records open the snapshot.
    pub fn has_updates(&self) -> bool {
        !self.changes.is_empty() && self.changes != ChangeSet::of(&[Change::Delete])
    }
}

/// All records of one discovery run, keyed by object id.
#[derive(Debug, Default)]
pub struct DiscoveryStore<'a> {
    records: HashMap<u64, DiscoveryRecord<'a>>,
}

impl<'a> DiscoveryStore<'a> {
    pub fn new() -> Self {
        DiscoveryStore {
            records: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        DiscoveryStore {
            records: HashMap::with_capacity(capacity),
        }
    }

    /// Add a record for `id` with no pending changes.
    ///
    /// An id may only be added once per run; adding it again returns the
    /// record already stored, unchanged.
    pub fn add(&mut self, id: u64, name: &'a str) -> &mut DiscoveryRecord<'a> {
        match self.records.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(DiscoveryRecord::new(id, name)),
        }
    }

    pub fn get(&self, id: u64) -> Option<&DiscoveryRecord<'a>> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut DiscoveryRecord<'a>> {
        self.records.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in arbitrary order.
    pub fn iter(&self) -> hash_map::Values<'_, u64, DiscoveryRecord<'a>> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> hash_map::ValuesMut<'_, u64, DiscoveryRecord<'a>> {
        self.records.values_mut()
    }

    pub fn ids_sorted(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Records that resolve to something other than [`PendingChange::NoChange`],
    /// lone deletes included. Use [`update_count`](Self::update_count) to tell
    /// whether a flush will open a snapshot.
    pub fn pending_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.pending() != PendingChange::NoChange)
            .count()
    }

    /// Records for which [`DiscoveryRecord::has_updates`] holds. A flush of
    /// this store opens a snapshot exactly when this is non-zero.
    pub fn update_count(&self) -> usize {
        self.records.values().filter(|r| r.has_updates()).count()
    }
}

impl<'s, 'a> IntoIterator for &'s DiscoveryStore<'a> {
    type Item = &'s DiscoveryRecord<'a>;
    type IntoIter = hash_map::Values<'s, u64, DiscoveryRecord<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_creates_inert_record() {
        let mut store = DiscoveryStore::new();
        let record = store.add(7, "cpu load");
        assert_eq!(record.id, 7);
        assert_eq!(record.name, "cpu load");
        assert!(record.is_inert());
        assert_eq!(record.pending(), PendingChange::NoChange);
        assert_eq!(store.len(), 1);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn re_adding_keeps_first_record() {
        let mut store = DiscoveryStore::new();
        store.add(7, "first").stage(Change::Lastcheck);

        let again = store.add(7, "second");
        assert_eq!(again.name, "first");
        assert!(again.has(Change::Lastcheck));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ids_sorted_and_pending_count() {
        let mut store = DiscoveryStore::with_capacity(3);
        store.add(30, "c").stage(Change::Delete);
        store.add(10, "a");
        store.add(20, "b").stage(Change::TsDelete);

        assert_eq!(store.ids_sorted(), vec![10, 20, 30]);
        assert_eq!(store.pending_count(), 2);
        assert_eq!((&store).into_iter().count(), 3);
    }

    #[test]
    fn update_count_skips_lone_deletes() {
        let mut store = DiscoveryStore::new();
        store.add(1, "a").stage(Change::Delete);
        store.add(2, "b");
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.update_count(), 0);
        assert!(!store.get(1).unwrap().has_updates());

        let both = store.add(3, "c");
        both.stage(Change::Delete);
        both.stage(Change::Lastcheck);
        assert!(both.has_updates());
        store.add(4, "d").stage(Change::Lastcheck);
        assert_eq!(store.pending_count(), 3);
        assert_eq!(store.update_count(), 2);
    }

    #[test]
    fn get_mut_mutates_in_place() {
        let mut store = DiscoveryStore::new();
        store.add(1, "x");
        store.get_mut(1).unwrap().stage(Change::ObjectExists);
        assert!(store.get(1).unwrap().has(Change::ObjectExists));
        assert!(store.get(2).is_none());
    }
}

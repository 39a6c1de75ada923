//! Pending-change reasons staged on a discovery record.
//!
//! Reasons combine freely while a run stages them. At flush time the set is
//! read through [`ChangeSet::resolve`], which applies the one precedence
//! rule: a staged deletion overrides every other change for the object.

use std::fmt;

use serde::{Serialize, Serializer};

/// One reason a discovery record needs writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Change {
    /// Refresh the "last observed" timestamp.
    Lastcheck,
    DiscoveryStatus,
    /// Write the object's own status (object table, not discovery table).
    ObjectStatus,
    DisableSource,
    TsDelete,
    TsDisable,
    /// Set while verifying under lock; never persisted.
    ObjectExists,
    /// Remove the object and its discovery record.
    Delete,
}

impl Change {
    pub const ALL: [Change; 8] = [
        Change::Lastcheck,
        Change::DiscoveryStatus,
        Change::ObjectStatus,
        Change::DisableSource,
        Change::TsDelete,
        Change::TsDisable,
        Change::ObjectExists,
        Change::Delete,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Change::Lastcheck => "lastcheck",
            Change::DiscoveryStatus => "discovery_status",
            Change::ObjectStatus => "object_status",
            Change::DisableSource => "disable_source",
            Change::TsDelete => "ts_delete",
            Change::TsDisable => "ts_disable",
            Change::ObjectExists => "object_exists",
            Change::Delete => "delete",
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`Change`] reasons.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeSet(u8);

impl ChangeSet {
    pub const EMPTY: ChangeSet = ChangeSet(0);

    /// Changes written to the discovery-record table other than `lastcheck`.
    pub const DISCOVERY_FIELDS: ChangeSet = ChangeSet::of(&[
        Change::DiscoveryStatus,
        Change::DisableSource,
        Change::TsDelete,
        Change::TsDisable,
    ]);

    /// Changes that end up in a discovery-record `update`.
    pub const DISCOVERY_UPDATE: ChangeSet = ChangeSet(
        ChangeSet::DISCOVERY_FIELDS.0 | Change::Lastcheck.bit(),
    );

    /// Everything except the internal verification marker.
    const PERSISTABLE: ChangeSet = ChangeSet(!Change::ObjectExists.bit());

    pub const fn of(changes: &[Change]) -> ChangeSet {
        let mut bits = 0;
        let mut i = 0;
        while i < changes.len() {
            bits |= changes[i].bit();
            i += 1;
        }
        ChangeSet(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, change: Change) -> bool {
        self.0 & change.bit() != 0
    }

    pub const fn intersects(self, other: ChangeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn intersection(self, other: ChangeSet) -> ChangeSet {
        ChangeSet(self.0 & other.0)
    }

    pub fn insert(&mut self, change: Change) {
        self.0 |= change.bit();
    }

    pub fn remove(&mut self, change: Change) {
        self.0 &= !change.bit();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Change> {
        Change::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    /// True when the only discovery-table write is the `lastcheck` refresh.
    pub const fn is_touch_only(self) -> bool {
        self.intersection(ChangeSet::DISCOVERY_UPDATE).0 == Change::Lastcheck.bit()
    }

    /// The flush-time view of this set.
    pub const fn resolve(self) -> PendingChange {
        if self.contains(Change::Delete) {
            return PendingChange::Delete;
        }

        let fields = self.intersection(ChangeSet::PERSISTABLE);
        if fields.is_empty() {
            PendingChange::NoChange
        } else {
            PendingChange::Fields(fields)
        }
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        let mut set = ChangeSet::EMPTY;
        for change in iter {
            set.insert(change);
        }
        set
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(Change::as_str))
    }
}

/// What a record asks of the flush, with deletion taking precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange {
    NoChange,
    Delete,
    Fields(ChangeSet),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut set = ChangeSet::EMPTY;
        assert!(set.is_empty());

        set.insert(Change::TsDelete);
        set.insert(Change::Lastcheck);
        assert!(set.contains(Change::TsDelete));
        assert!(!set.contains(Change::Delete));
        assert_eq!(set.len(), 2);

        set.remove(Change::TsDelete);
        assert_eq!(set, ChangeSet::of(&[Change::Lastcheck]));

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn iterates_in_declaration_order() {
        let set: ChangeSet = [Change::Delete, Change::Lastcheck, Change::TsDisable]
            .into_iter()
            .collect();
        let order: Vec<_> = set.iter().collect();
        assert_eq!(order, vec![Change::Lastcheck, Change::TsDisable, Change::Delete]);
    }

    #[test]
    fn delete_dominates() {
        let set = ChangeSet::of(&[Change::Delete, Change::ObjectStatus, Change::TsDelete]);
        assert_eq!(set.resolve(), PendingChange::Delete);
        assert_eq!(ChangeSet::of(&[Change::Delete]).resolve(), PendingChange::Delete);
    }

    #[test]
    fn existence_marker_alone_is_no_change() {
        assert_eq!(ChangeSet::EMPTY.resolve(), PendingChange::NoChange);
        assert_eq!(
            ChangeSet::of(&[Change::ObjectExists]).resolve(),
            PendingChange::NoChange
        );
        assert_eq!(
            ChangeSet::of(&[Change::ObjectExists, Change::Lastcheck]).resolve(),
            PendingChange::Fields(ChangeSet::of(&[Change::Lastcheck]))
        );
    }

    #[test]
    fn touch_only_detection() {
        assert!(ChangeSet::of(&[Change::Lastcheck]).is_touch_only());
        assert!(ChangeSet::of(&[Change::Lastcheck, Change::ObjectStatus]).is_touch_only());
        assert!(!ChangeSet::of(&[Change::Lastcheck, Change::TsDelete]).is_touch_only());
        assert!(!ChangeSet::of(&[Change::ObjectStatus]).is_touch_only());
        assert!(!ChangeSet::EMPTY.is_touch_only());
    }

    #[test]
    fn serializes_as_names() {
        let set = ChangeSet::of(&[Change::TsDelete, Change::Lastcheck]);
        assert_eq!(
            serde_json::to_value(set).unwrap(),
            serde_json::json!(["lastcheck", "ts_delete"])
        );
    }
}

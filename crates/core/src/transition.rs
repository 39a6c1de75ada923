//! State transitions for one discovery outcome each.
//!
//! Every function takes the record plus the object's current stored values,
//! as freshly read by the caller, and stages a change only where the new
//! value differs from the stored one. None of them perform I/O.
//!
//! Callers invoke exactly one of `on_confirmed` / `on_lost` per object and
//! run, optionally followed by `on_reenable` (confirmed objects) or
//! `on_lost_should_disable` (lost objects whose kind disables before
//! deleting).

use crate::change::Change;
use crate::lifetime::{has_elapsed, resolve_timestamp, LifetimePolicy, Timestamp, TS_NONE};
use crate::record::DiscoveryRecord;
use crate::status::{DisableSource, DiscoveryStatus, ObjectStatus};

/// Discovery observed the object this run.
pub fn on_confirmed(
    record: &mut DiscoveryRecord<'_>,
    discovery_status: DiscoveryStatus,
    ts_delete: Timestamp,
) {
    record.stage(Change::Lastcheck);

    if discovery_status != DiscoveryStatus::Normal {
        record.discovery_status = DiscoveryStatus::Normal;
        record.stage(Change::DiscoveryStatus);
    }

    if ts_delete != TS_NONE {
        record.ts_delete = TS_NONE;
        record.stage(Change::TsDelete);
    }
}

/// Discovery observed an object it had previously disabled for being lost.
pub fn on_reenable(
    record: &mut DiscoveryRecord<'_>,
    object_status: ObjectStatus,
    disable_source: DisableSource,
    ts_disable: Timestamp,
) {
    if object_status == ObjectStatus::Disabled && disable_source == DisableSource::LostDiscovery {
        record.object_status = ObjectStatus::Enabled;
        record.disable_source = DisableSource::Default;
        record.stage(Change::ObjectStatus);
        record.stage(Change::DisableSource);
    }

    if ts_disable != TS_NONE {
        record.ts_disable = TS_NONE;
        record.stage(Change::TsDisable);
    }
}

/// Discovery did not observe the object this run.
///
/// Schedules deletion per `lifetime` and stages the deletion itself once
/// that schedule has elapsed, unless the object was disabled by someone
/// other than discovery.
#[allow(clippy::too_many_arguments)]
pub fn on_lost(
    record: &mut DiscoveryRecord<'_>,
    object_status: ObjectStatus,
    lastcheck: Timestamp,
    now: Timestamp,
    lifetime: &LifetimePolicy,
    discovery_status: DiscoveryStatus,
    disable_source: DisableSource,
    ts_delete: Timestamp,
) {
    let ts = resolve_timestamp(lastcheck, lifetime);

    if ts != ts_delete {
        record.ts_delete = ts;
        record.stage(Change::TsDelete);
    }

    if discovery_status != DiscoveryStatus::Lost {
        record.discovery_status = DiscoveryStatus::Lost;
        record.stage(Change::DiscoveryStatus);
    }

    if has_elapsed(now, ts)
        && (object_status == ObjectStatus::Enabled
            || disable_source == DisableSource::LostDiscovery)
    {
        record.stage(Change::Delete);
    }
}

/// Discovery did not observe the object and its kind disables lost objects
/// once `lifetime` has elapsed.
pub fn on_lost_should_disable(
    record: &mut DiscoveryRecord<'_>,
    object_status: ObjectStatus,
    lastcheck: Timestamp,
    now: Timestamp,
    lifetime: &LifetimePolicy,
    ts_disable: Timestamp,
) {
    let ts = resolve_timestamp(lastcheck, lifetime);

    if ts != ts_disable {
        record.ts_disable = ts;
        record.stage(Change::TsDisable);
    }

    if !has_elapsed(now, ts) {
        return;
    }

    if object_status == ObjectStatus::Enabled {
        record.object_status = ObjectStatus::Disabled;
        record.disable_source = DisableSource::LostDiscovery;
        record.stage(Change::ObjectStatus);
        record.stage(Change::DisableSource);
    }
}

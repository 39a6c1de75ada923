//! lapse-core: lifecycle decisions for objects produced by recurring
//! discovery runs.
//!
//! A discovery run re-observes a set of objects. For each object the run
//! calls one of the functions in [`transition`], which stage pending changes
//! on a [`DiscoveryRecord`] kept in the run's [`DiscoveryStore`]. The staged
//! store is then handed to the flush engine (`lapse-engine`), which writes it
//! to storage in one transaction.
//!
//! Nothing here performs I/O.

pub mod change;
pub mod error;
pub mod lifetime;
pub mod record;
pub mod status;
pub mod transition;

pub use change::{Change, ChangeSet, PendingChange};
pub use error::CoreError;
pub use lifetime::{
    end_of_life, has_elapsed, parse_duration, resolve_timestamp, LifetimeKind, LifetimePolicy,
    Timestamp, TIME_HORIZON, TS_IMMEDIATE, TS_NONE,
};
pub use record::{DiscoveryRecord, DiscoveryStore};
pub use status::{DisableSource, DiscoveryStatus, ObjectStatus};
pub use transition::{on_confirmed, on_lost, on_lost_should_disable, on_reenable};

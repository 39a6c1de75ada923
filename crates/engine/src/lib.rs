//! lapse-engine: end-of-run reconciliation for discovered objects.
//!
//! A discovery run stages its decisions in a [`lapse_core::DiscoveryStore`]
//! and hands the store to [`flush_discoveries`] together with the kind's
//! table layout ([`ObjectKind`]) and collaborators ([`ObjectKindHandler`]).
//! The flush re-checks staged status changes under row locks and writes
//! everything in one storage snapshot.

pub mod audit;
pub mod config;
mod error;
mod flush;
pub mod kind;
mod writer;

pub use audit::{AuditEntry, AuditTrail};
pub use config::{read_config, FlushConfig, LifecycleConfig, ObjectKindConfig};
pub use error::{ConfigError, FlushError};
pub use flush::{flush_discoveries, unix_now, FlushReport};
pub use kind::{
    AuditAction, AuditContext, ObjectKind, ObjectKindHandler, StatusCodes, TableHandler,
    DISCOVERY_CREATED,
};
pub use writer::BatchWriter;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{Row, StatusRow};
use crate::statement::Statement;

/// The storage trait for lifecycle reconciliation backends.
///
/// A `LifecycleStorage` implementation provides transactional access to the
/// object tables and discovery-record tables of every object kind the
/// engine reconciles.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call locking/mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back and every row lock it holds MUST be released.
///
/// ## Row Locks
///
/// `lock_rows` has `SELECT ... FOR UPDATE` semantics: the returned rows stay
/// locked until the snapshot ends, and the call blocks while another open
/// snapshot holds a lock on any requested row. Writes lock the rows they
/// touch the same way.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one backend can serve
/// discovery runs on several worker tasks.
#[async_trait]
pub trait LifecycleStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Operations (within snapshot) ──────────────────────────────────────────

    /// Read the `status` column of the given rows, locking them for update.
    ///
    /// Ids without a row are absent from the result; that is not an error.
    async fn lock_rows(
        &self,
        snapshot: &mut Self::Snapshot,
        table: &str,
        id_field: &str,
        ids: &[u64],
    ) -> Result<Vec<StatusRow>, StorageError>;

    /// Execute a batch of statements in order.
    ///
    /// Statements addressing rows that no longer exist affect nothing.
    async fn execute(
        &self,
        snapshot: &mut Self::Snapshot,
        statements: &[Statement],
    ) -> Result<(), StorageError>;

    /// Delete the given rows. Returns how many rows existed and were removed.
    async fn delete_rows(
        &self,
        snapshot: &mut Self::Snapshot,
        table: &str,
        id_field: &str,
        ids: &[u64],
    ) -> Result<usize, StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a committed row without locking.
    async fn read_row(&self, table: &str, id: u64) -> Result<Option<Row>, StorageError>;
}

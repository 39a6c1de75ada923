use lapse_storage::{LifecycleStorage, Statement, StorageError};
use tracing::debug;

use crate::config::FlushConfig;

/// Accumulates statements and executes them in batches.
///
/// A batch is executed as soon as its rendered SQL reaches `max_batch_bytes`
/// or, when `max_batch_statements` is non-zero, as soon as it holds that many
/// statements. [`finish`](Self::finish) executes whatever is left. Statements
/// always reach storage in the order they were pushed.
pub struct BatchWriter<'s, S: LifecycleStorage> {
    storage: &'s S,
    max_bytes: usize,
    max_statements: usize,
    pending: Vec<Statement>,
    pending_bytes: usize,
    executed: usize,
    batches: usize,
}

impl<'s, S: LifecycleStorage> BatchWriter<'s, S> {
    pub fn new(storage: &'s S, config: &FlushConfig) -> Self {
        BatchWriter {
            storage,
            max_bytes: config.max_batch_bytes,
            max_statements: config.max_batch_statements,
            pending: Vec::new(),
            pending_bytes: 0,
            executed: 0,
            batches: 0,
        }
    }

    pub async fn push(
        &mut self,
        snapshot: &mut S::Snapshot,
        statement: Statement,
    ) -> Result<(), StorageError> {
        // +1 for the statement separator.
        self.pending_bytes += statement.to_sql().len() + 1;
        self.pending.push(statement);

        if self.at_boundary() {
            self.flush(snapshot).await?;
        }
        Ok(())
    }

    /// Execute the pending statements, if any.
    pub async fn flush(&mut self, snapshot: &mut S::Snapshot) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        debug!(
            statements = batch.len(),
            bytes = self.pending_bytes,
            "executing statement batch"
        );
        self.storage.execute(snapshot, &batch).await?;

        self.executed += batch.len();
        self.batches += 1;
        self.pending_bytes = 0;
        Ok(())
    }

    /// Execute the remainder. Returns the number of statements executed over
    /// the writer's lifetime.
    pub async fn finish(mut self, snapshot: &mut S::Snapshot) -> Result<usize, StorageError> {
        self.flush(snapshot).await?;
        Ok(self.executed)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Number of `execute` calls made so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    fn at_boundary(&self) -> bool {
        self.pending_bytes >= self.max_bytes
            || (self.max_statements != 0 && self.pending.len() >= self.max_statements)
    }
}

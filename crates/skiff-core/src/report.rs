//! Per-chunk outcome aggregation and the final import report.

use serde::Serialize;
use uuid::Uuid;

use crate::transaction::TransactionStatus;
use crate::types::{ChunkOutcome, Record, RecordId};

/// Running totals, as seen by [`ImportDefinition::rollback_requested`](crate::ImportDefinition::rollback_requested).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportProgress {
    /// Chunks delivered so far, including ones whose rows were all skipped.
    pub chunks: u64,
    /// Records seen by the importer, skipped ones included.
    pub rows_seen: u64,
    /// Records persisted.
    pub inserted: u64,
    /// Records rejected by validation.
    pub failed: u64,
    /// Records dropped by the preprocessing hook.
    pub skipped: u64,
}

/// Folds chunk outcomes in arrival order.
#[derive(Debug)]
pub struct ResultAggregator<E> {
    chunks: u64,
    total_inserted: u64,
    inserted_ids: Vec<RecordId>,
    invalid_records: Vec<E>,
}

impl<E> Default for ResultAggregator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ResultAggregator<E> {
    pub fn new() -> Self {
        Self {
            chunks: 0,
            total_inserted: 0,
            inserted_ids: Vec::new(),
            invalid_records: Vec::new(),
        }
    }

    /// Count a delivered chunk, whether or not it reached the backend.
    pub fn record_chunk(&mut self) {
        self.chunks += 1;
    }

    /// Fold one backend outcome.
    pub fn add(&mut self, outcome: ChunkOutcome<E>) {
        self.total_inserted += outcome.inserted;
        self.inserted_ids.extend(outcome.ids);
        self.invalid_records.extend(outcome.failed);
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    pub fn failed(&self) -> u64 {
        self.invalid_records.len() as u64
    }

    /// Mutable access to failed records, for post-run handling.
    pub fn invalid_records_mut(&mut self) -> &mut [E] {
        &mut self.invalid_records
    }

    /// Build the immutable report.
    pub fn finish(
        self,
        run_id: Uuid,
        rows_seen: u64,
        skipped_rows: Vec<Record>,
        transaction: TransactionStatus,
    ) -> ImportReport<E> {
        ImportReport {
            run_id,
            total_inserted: self.total_inserted,
            inserted_ids: self.inserted_ids,
            invalid_records: self.invalid_records,
            skipped_rows,
            chunks: self.chunks,
            rows_seen,
            transaction,
        }
    }
}

/// What an import run inserted, rejected, and skipped.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport<E> {
    run_id: Uuid,
    total_inserted: u64,
    inserted_ids: Vec<RecordId>,
    invalid_records: Vec<E>,
    skipped_rows: Vec<Record>,
    chunks: u64,
    rows_seen: u64,
    transaction: TransactionStatus,
}

impl<E> ImportReport<E> {
    /// Identifier of the run, also attached to its log span.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Sum of every chunk's inserted count.
    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    /// Assigned identifiers in chunk order.
    pub fn inserted_ids(&self) -> &[RecordId] {
        &self.inserted_ids
    }

    /// Records rejected by validation, in chunk order.
    pub fn invalid_records(&self) -> &[E] {
        &self.invalid_records
    }

    /// Original records the preprocessing hook discarded.
    pub fn skipped_rows(&self) -> &[Record] {
        &self.skipped_rows
    }

    /// Number of chunks delivered by the source.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Records seen by the importer when the run finished.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// How the run's transaction ended.
    pub fn transaction(&self) -> TransactionStatus {
        self.transaction
    }

    /// Whether every record was inserted or deliberately skipped.
    pub fn is_success(&self) -> bool {
        self.invalid_records.is_empty() && self.transaction != TransactionStatus::RolledBackByRequest
    }

    /// Take the failed records out of the report.
    pub fn into_invalid_records(self) -> Vec<E> {
        self.invalid_records
    }
}

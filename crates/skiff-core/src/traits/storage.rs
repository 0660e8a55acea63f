//! Storage backend trait.

use crate::config::WriteOptions;
use crate::error::ImportResult;
use crate::types::{ChunkOutcome, Row};

/// A backend that persists rows in bulk.
///
/// Implementations own their connection and any open transaction. The
/// importer drives `begin`/`commit`/`rollback` only when the run is wrapped
/// in a transaction; every `bulk_insert` call must itself be atomic so that a
/// failed chunk leaves nothing behind.
pub trait Storage {
    /// The backend's own representation of a record.
    type Entity;

    /// Persist every row that passes validation and report the rest.
    ///
    /// Validation failures go to [`ChunkOutcome::failed`]; only hard failures
    /// (constraint violations outside validation, I/O) are errors.
    fn bulk_insert(
        &mut self,
        target: &str,
        rows: Vec<Row<Self::Entity>>,
        options: &WriteOptions,
    ) -> ImportResult<ChunkOutcome<Self::Entity>>;

    /// Persist all rows or none: any invalid row is an error.
    ///
    /// The importer always writes through [`bulk_insert`](Self::bulk_insert).
    /// This is for callers writing their own batches that must not accept
    /// partial chunks, such as reference data loaded ahead of an import.
    fn bulk_insert_strict(
        &mut self,
        target: &str,
        rows: Vec<Row<Self::Entity>>,
        options: &WriteOptions,
    ) -> ImportResult<ChunkOutcome<Self::Entity>>;

    /// Open a transaction spanning subsequent writes.
    fn begin(&mut self) -> ImportResult<()>;

    /// Make everything since `begin` durable.
    fn commit(&mut self) -> ImportResult<()>;

    /// Undo everything since `begin`.
    fn rollback(&mut self) -> ImportResult<()>;
}

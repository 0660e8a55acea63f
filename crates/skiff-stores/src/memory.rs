//! In-memory storage backend.

use std::collections::HashMap;

use tracing::debug;

use skiff_core::config::WriteOptions;
use skiff_core::error::{ErrorCode, ImportError, ImportResult};
use skiff_core::traits::Storage;
use skiff_core::types::{ChunkOutcome, RecordId, Row, Value};

use crate::schema::{is_blank, prepare, Entity, TableSchema};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Entity>,
    next_id: RecordId,
}

impl MemoryTable {
    fn holds(&self, column: &str, value: &Value) -> bool {
        self.rows.iter().any(|row| row.get(column) == Some(value))
    }
}

/// Tables held in memory, with snapshot transactions.
///
/// Unique columns behave like a unique index: inserting a duplicate that
/// validation did not catch fails the whole call.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, MemoryTable>,
    snapshot: Option<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    /// An empty store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table. An existing table of the same name is kept.
    pub fn create_table(&mut self, schema: TableSchema) {
        self.tables
            .entry(schema.name.clone())
            .or_insert_with(|| MemoryTable {
                schema,
                rows: Vec::new(),
                next_id: 1,
            });
    }

    /// Builder form of [`create_table`](Self::create_table).
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.create_table(schema);
        self
    }

    /// Stored rows of `target`, in insertion order.
    pub fn rows(&self, target: &str) -> ImportResult<&[Entity]> {
        Ok(&self.table(target)?.rows)
    }

    /// Number of stored rows in `target`.
    pub fn count(&self, target: &str) -> ImportResult<usize> {
        Ok(self.table(target)?.rows.len())
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn table(&self, target: &str) -> ImportResult<&MemoryTable> {
        self.tables.get(target).ok_or_else(|| unknown_target(target))
    }

    fn insert(
        &mut self,
        target: &str,
        rows: Vec<Row<Entity>>,
        options: &WriteOptions,
        strict: bool,
    ) -> ImportResult<ChunkOutcome<Entity>> {
        let table = self
            .tables
            .get_mut(target)
            .ok_or_else(|| unknown_target(target))?;

        let prepared = prepare(&table.schema, rows, options, |column, value| {
            Ok(table.holds(column, value))
        })?;
        if strict {
            if let Some(invalid) = prepared.failed.first() {
                return Err(record_invalid(invalid));
            }
        }

        // Unique index check before anything is written, so the call is atomic.
        for (index, entity) in prepared.accepted.iter().enumerate() {
            for column in table.schema.unique_columns() {
                let Some(value) = entity.get(&column.name).filter(|v| !is_blank(Some(*v))) else {
                    continue;
                };
                let clash = table.holds(&column.name, value)
                    || prepared.accepted[..index]
                        .iter()
                        .any(|other| other.get(&column.name) == Some(value));
                if clash {
                    return Err(ImportError::backend_with(
                        format!(
                            "UNIQUE constraint failed: {}.{} ({})",
                            target, column.name, value
                        ),
                        ErrorCode::DbConstraintViolation,
                        None,
                    ));
                }
            }
        }

        let mut ids = Vec::with_capacity(prepared.accepted.len());
        for mut entity in prepared.accepted {
            let id = table.next_id;
            table.next_id += 1;
            entity.id = Some(id);
            ids.push(id);
            table.rows.push(entity);
        }

        debug!(
            table = target,
            inserted = ids.len(),
            failed = prepared.failed.len(),
            ignored = prepared.ignored,
            "Bulk insert into memory table"
        );

        Ok(ChunkOutcome {
            inserted: ids.len() as u64,
            ids,
            failed: prepared.failed,
        })
    }
}

impl Storage for MemoryStore {
    type Entity = Entity;

    fn bulk_insert(
        &mut self,
        target: &str,
        rows: Vec<Row<Entity>>,
        options: &WriteOptions,
    ) -> ImportResult<ChunkOutcome<Entity>> {
        self.insert(target, rows, options, false)
    }

    fn bulk_insert_strict(
        &mut self,
        target: &str,
        rows: Vec<Row<Entity>>,
        options: &WriteOptions,
    ) -> ImportResult<ChunkOutcome<Entity>> {
        self.insert(target, rows, options, true)
    }

    fn begin(&mut self) -> ImportResult<()> {
        if self.snapshot.is_some() {
            return Err(transaction_state("a transaction is already open"));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> ImportResult<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| transaction_state("no transaction to commit"))
    }

    fn rollback(&mut self) -> ImportResult<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| transaction_state("no transaction to roll back"))?;
        self.tables = snapshot;
        Ok(())
    }
}

pub(crate) fn unknown_target(target: &str) -> ImportError {
    ImportError::backend_with(
        format!("no such table: {}", target),
        ErrorCode::DbUnknownTarget,
        None,
    )
}

pub(crate) fn record_invalid(entity: &Entity) -> ImportError {
    let reasons: Vec<String> = entity.errors.iter().map(ToString::to_string).collect();
    ImportError::backend_with(
        format!("validation failed: {}", reasons.join(", ")),
        ErrorCode::DbConstraintViolation,
        None,
    )
}

fn transaction_state(message: &str) -> ImportError {
    ImportError::backend_with(message, ErrorCode::DbTransactionState, None)
}

//! SQLite storage backend on rusqlite.
//!
//! Rows are written with multi-row `INSERT ... RETURNING id` statements of at
//! most `batch_size` rows. Each bulk insert runs inside a savepoint, so a
//! failing call leaves nothing behind whether or not an outer transaction is
//! open.
//!
//! # Example
//!
//! ```ignore
//! use skiff_stores::{ColumnDef, SqliteStore, TableSchema};
//!
//! let store = SqliteStore::in_memory()?.with_table(
//!     TableSchema::new("products")
//!         .column(ColumnDef::new("name").required())
//!         .column(ColumnDef::new("rank").required().unique())
//!         .with_timestamps(),
//! )?;
//! ```

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use skiff_core::config::WriteOptions;
use skiff_core::error::{ErrorCode, ImportError, ImportResult};
use skiff_core::traits::Storage;
use skiff_core::types::{ChunkOutcome, Record, Row, Value};

use crate::memory::{record_invalid, unknown_target};
use crate::schema::{prepare, Entity, TableSchema, ID_COLUMN};

/// Rows per INSERT statement unless `batch_size` says otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Upper bound on bound parameters per statement.
const MAX_VARIABLES: usize = 32_766;

/// Map a rusqlite error to a backend error, keeping constraint violations
/// distinguishable.
pub fn sqlite_error(context: &str, err: rusqlite::Error) -> ImportError {
    let code = match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => ErrorCode::DbConstraintViolation,
        _ => ErrorCode::DbOperationFailed,
    };
    ImportError::backend_with(format!("{}: {}", context, err), code, Some(Box::new(err)))
}

/// A SQLite database holding import targets.
pub struct SqliteStore {
    conn: Connection,
    schemas: HashMap<String, TableSchema>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> ImportResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| sqlite_error("Failed to open SQLite database", e))?;
        debug!(path = %path.as_ref().display(), "Opened SQLite import store");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> ImportResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| sqlite_error("Failed to open in-memory SQLite database", e))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection. Tables already in it are left alone.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            schemas: HashMap::new(),
        }
    }

    /// Create the table for `schema` unless it exists, and register it as a
    /// target.
    pub fn create_table(&mut self, schema: TableSchema) -> ImportResult<()> {
        let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ID_COLUMN)];
        for column in &schema.columns {
            let mut def = quote(&column.name);
            if column.unique {
                def.push_str(" UNIQUE");
            }
            columns.push(def);
        }
        if schema.timestamps {
            columns.push(format!("{} TEXT", quote(crate::schema::CREATED_AT)));
            columns.push(format!("{} TEXT", quote(crate::schema::UPDATED_AT)));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&schema.name),
            columns.join(", ")
        );
        self.conn
            .execute(&sql, [])
            .map_err(|e| sqlite_error("Failed to create table", e))?;

        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Builder form of [`create_table`](Self::create_table).
    pub fn with_table(mut self, schema: TableSchema) -> ImportResult<Self> {
        self.create_table(schema)?;
        Ok(self)
    }

    /// The underlying connection, for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Stored rows of `target` ordered by id. NULL columns are omitted.
    pub fn rows(&self, target: &str) -> ImportResult<Vec<Entity>> {
        let schema = self.schema(target)?;
        let columns = schema.writable_columns();
        let select: Vec<String> = std::iter::once(ID_COLUMN)
            .chain(columns.iter().copied())
            .map(quote)
            .collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            quote(target),
            ID_COLUMN
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| sqlite_error("Failed to query rows", e))?;
        let rows = stmt
            .query_map([], |row| {
                let mut fields = Record::new();
                for (index, column) in columns.iter().enumerate() {
                    let value: SqlValue = row.get(index + 1)?;
                    if value != SqlValue::Null {
                        fields.insert((*column).to_string(), from_sql(value));
                    }
                }
                Ok(Entity {
                    id: Some(row.get(0)?),
                    fields,
                    errors: Vec::new(),
                })
            })
            .map_err(|e| sqlite_error("Failed to query rows", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| sqlite_error("Failed to read row", e))?;
        Ok(rows)
    }

    pub fn count(&self, target: &str) -> ImportResult<usize> {
        self.schema(target)?;
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(target)), [], |row| {
                row.get(0)
            })
            .map_err(|e| sqlite_error("Failed to count rows", e))?;
        Ok(count as usize)
    }

    fn schema(&self, target: &str) -> ImportResult<&TableSchema> {
        self.schemas.get(target).ok_or_else(|| unknown_target(target))
    }

    fn insert(
        &mut self,
        target: &str,
        rows: Vec<Row<Entity>>,
        options: &WriteOptions,
        strict: bool,
    ) -> ImportResult<ChunkOutcome<Entity>> {
        let schema = self.schema(target)?.clone();
        let conn = &self.conn;
        let prepared = prepare(&schema, rows, options, |column, value| {
            is_taken(conn, target, column, value)
        })?;
        if strict {
            if let Some(invalid) = prepared.failed.first() {
                return Err(record_invalid(invalid));
            }
        }

        let columns = schema.writable_columns();
        let batch_size = options
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .min(MAX_VARIABLES / columns.len().max(1))
            .max(1);

        let savepoint = self
            .conn
            .savepoint()
            .map_err(|e| sqlite_error("Failed to open savepoint", e))?;
        let mut ids = Vec::with_capacity(prepared.accepted.len());
        for batch in prepared.accepted.chunks(batch_size) {
            let sql = insert_sql(target, &columns, batch.len());
            let params: Vec<SqlValue> = batch
                .iter()
                .flat_map(|entity| columns.iter().map(|column| to_sql(entity.get(column))))
                .collect();

            let mut stmt = savepoint
                .prepare_cached(&sql)
                .map_err(|e| sqlite_error("Failed to prepare insert", e))?;
            let mut batch_ids = stmt
                .query_map(params_from_iter(params), |row| row.get::<_, i64>(0))
                .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                .map_err(|e| sqlite_error(&format!("Failed to insert into {}", target), e))?;
            // AUTOINCREMENT ids grow in insertion order.
            batch_ids.sort_unstable();
            ids.extend(batch_ids);
        }
        savepoint
            .commit()
            .map_err(|e| sqlite_error("Failed to release savepoint", e))?;

        debug!(
            table = target,
            inserted = ids.len(),
            failed = prepared.failed.len(),
            ignored = prepared.ignored,
            batch_size,
            "Bulk insert into SQLite"
        );

        Ok(ChunkOutcome {
            inserted: ids.len() as u64,
            ids,
            failed: prepared.failed,
        })
    }
}

impl Storage for SqliteStore {
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
        if !self.conn.is_autocommit() {
            return Err(ImportError::backend_with(
                "a transaction is already open",
                ErrorCode::DbTransactionState,
                None,
            ));
        }
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| sqlite_error("Failed to begin transaction", e))
    }

    fn commit(&mut self) -> ImportResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| sqlite_error("Failed to commit transaction", e))
    }

    fn rollback(&mut self) -> ImportResult<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| sqlite_error("Failed to roll back transaction", e))
    }
}

fn is_taken(conn: &Connection, target: &str, column: &str, value: &Value) -> ImportResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
        quote(target),
        quote(column)
    );
    conn.query_row(&sql, [to_sql(Some(value))], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(|e| sqlite_error("Failed to check uniqueness", e))
}

fn insert_sql(target: &str, columns: &[&str], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {} RETURNING {}",
        quote(target),
        names.join(", "),
        vec![placeholders; rows].join(", "),
        ID_COLUMN
    )
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::from(bytes),
    }
}

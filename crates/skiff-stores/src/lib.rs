//! skiff-stores - Storage backends for skiff imports.
//!
//! # Supported Backends
//!
//! - **Memory** - tables held in process memory, snapshot transactions
//! - **SQLite** (feature: `sqlite`, on by default) - rusqlite with savepoints
//!
//! Both backends store [`Entity`] values described by a [`TableSchema`] and
//! apply the same presence and uniqueness validations.

mod memory;
pub mod schema;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
pub use schema::{ColumnDef, Entity, TableSchema, ValidationError, ValidationRule};

#[cfg(feature = "sqlite")]
pub use sqlite::{sqlite_error, SqliteStore, DEFAULT_BATCH_SIZE};

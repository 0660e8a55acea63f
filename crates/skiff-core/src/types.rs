//! Core data types flowing through an import run.

use serde::{Deserialize, Serialize};

/// A dynamically typed field value.
pub type Value = serde_json::Value;

/// One decoded row: an ordered mapping from field name to value.
pub type Record = serde_json::Map<String, Value>;

/// Identifier a backend assigns to an inserted record.
pub type RecordId = i64;

/// A record after preprocessing.
///
/// Preprocessing hooks may keep the plain mapping or build the backend's own
/// entity type directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row<E> {
    /// A field-name to value mapping.
    Plain(Record),
    /// A backend-native entity.
    Native(E),
}

impl<E> Row<E> {
    /// The plain record, if this row has not been turned into an entity.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Row::Plain(record) => Some(record),
            Row::Native(_) => None,
        }
    }
}

impl<E> From<Record> for Row<E> {
    fn from(record: Record) -> Self {
        Row::Plain(record)
    }
}

/// Read-only context handed to the preprocessing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowContext {
    /// 1-based count of records seen by this importer, including skipped ones.
    pub row_number: u64,
}

/// Result of writing one chunk to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome<E> {
    /// Number of records persisted.
    pub inserted: u64,
    /// Identifiers assigned to persisted records, in insertion order.
    pub ids: Vec<RecordId>,
    /// Records rejected by validation, in their backend-native form.
    pub failed: Vec<E>,
}

impl<E> ChunkOutcome<E> {
    /// An outcome with nothing inserted and nothing failed.
    pub fn empty() -> Self {
        Self {
            inserted: 0,
            ids: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<E> Default for ChunkOutcome<E> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Build a [`Record`] from `(field, value)` pairs.
///
/// # Example
///
/// ```
/// use skiff_core::types::record;
/// use serde_json::json;
///
/// let row = record([("name", json!("Widget")), ("rank", json!(1))]);
/// assert_eq!(row["name"], json!("Widget"));
/// ```
pub fn record<K, I>(pairs: I) -> Record
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

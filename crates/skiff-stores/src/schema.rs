//! Table schemas, the stored entity type, and record validation shared by
//! the bundled backends.

use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use skiff_core::config::WriteOptions;
use skiff_core::error::{ErrorCode, ImportError, ImportResult};
use skiff_core::types::{Record, RecordId, Row, Value};

/// Column holding the backend-assigned identifier.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// A validation a column opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationRule {
    /// The value must be present and not blank.
    Presence,
    /// No other stored record may have the same value.
    Uniqueness,
}

/// One failed validation on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{field} {message}")]
pub struct ValidationError {
    pub field: String,
    pub rule: ValidationRule,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, rule: ValidationRule) -> Self {
        let message = match rule {
            ValidationRule::Presence => "can't be blank",
            ValidationRule::Uniqueness => "has already been taken",
        };
        Self {
            field: field.to_string(),
            rule,
            message: message.to_string(),
        }
    }
}

/// A column of a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Validated for presence. Not enforced by the table itself.
    pub required: bool,
    /// Validated for uniqueness and backed by a unique index.
    pub unique: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Shape of a target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Whether the table carries `created_at` and `updated_at`.
    pub timestamps: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            timestamps: false,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Look up a column by name.
    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Every writable column, timestamps included, in declaration order.
    pub fn writable_columns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        if self.timestamps {
            names.push(CREATED_AT);
            names.push(UPDATED_AT);
        }
        names
    }

    pub fn unique_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.unique)
    }

    fn accepts(&self, field: &str) -> bool {
        field == ID_COLUMN
            || self.get(field).is_some()
            || (self.timestamps && (field == CREATED_AT || field == UPDATED_AT))
    }
}

/// A stored (or about to be stored) record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    /// Assigned on insert.
    pub id: Option<RecordId>,
    pub fields: Record,
    /// Validation failures; empty for persisted entities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

impl Entity {
    pub fn new(fields: Record) -> Self {
        Self {
            id: None,
            fields,
            errors: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

impl From<Row<Entity>> for Entity {
    fn from(row: Row<Entity>) -> Self {
        match row {
            Row::Plain(fields) => Entity::new(fields),
            Row::Native(entity) => entity,
        }
    }
}

/// Whether a value counts as blank for presence validation.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Comparison key for unique values; blanks never collide.
fn unique_key(column: &str, value: Option<&Value>) -> Option<(String, String)> {
    (!is_blank(value)).then(|| {
        (
            column.to_string(),
            value.map(Value::to_string).unwrap_or_default(),
        )
    })
}

/// Rows split by validation, ready for a backend to write.
#[derive(Debug, Default)]
pub(crate) struct Prepared {
    pub accepted: Vec<Entity>,
    pub failed: Vec<Entity>,
    /// Rows dropped as duplicates under `on_duplicate_key_ignore`.
    pub ignored: usize,
}

/// Validate rows against `schema` and fill timestamps.
///
/// `is_taken(column, value)` reports whether a stored record already holds
/// `value` in a unique column. Unknown attributes are a hard error.
pub(crate) fn prepare<F>(
    schema: &TableSchema,
    rows: Vec<Row<Entity>>,
    options: &WriteOptions,
    mut is_taken: F,
) -> ImportResult<Prepared>
where
    F: FnMut(&str, &Value) -> ImportResult<bool>,
{
    let mut prepared = Prepared::default();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    for row in rows {
        let mut entity = Entity::from(row);
        entity.errors.clear();

        if let Some(field) = entity.fields.keys().find(|f| !schema.accepts(f)) {
            return Err(ImportError::backend_with(
                format!("unknown attribute '{}' for {}", field, schema.name),
                ErrorCode::DbUnknownAttribute,
                None,
            ));
        }

        let mut duplicate = false;
        for column in &schema.columns {
            let value = entity.get(&column.name).cloned();
            let value = value.as_ref();
            if options.validate() && column.required && is_blank(value) {
                entity
                    .errors
                    .push(ValidationError::new(&column.name, ValidationRule::Presence));
            }
            if !column.unique {
                continue;
            }
            let Some(key) = unique_key(&column.name, value) else {
                continue;
            };
            if !options.validate() && !options.ignore_duplicates() {
                continue;
            }
            let taken = seen.contains(&key)
                || match value {
                    Some(v) => is_taken(&column.name, v)?,
                    None => false,
                };
            if taken {
                if options.validate() {
                    entity
                        .errors
                        .push(ValidationError::new(&column.name, ValidationRule::Uniqueness));
                } else {
                    duplicate = true;
                }
            }
        }

        if !entity.is_valid() {
            prepared.failed.push(entity);
            continue;
        }
        if duplicate {
            prepared.ignored += 1;
            continue;
        }

        for column in schema.unique_columns() {
            if let Some(key) = unique_key(&column.name, entity.get(&column.name)) {
                seen.insert(key);
            }
        }
        if schema.timestamps && options.timestamps() {
            for column in [CREATED_AT, UPDATED_AT] {
                if is_blank(entity.get(column)) {
                    entity.fields.insert(column.to_string(), Value::String(now.clone()));
                }
            }
        }
        prepared.accepted.push(entity);
    }

    Ok(prepared)
}

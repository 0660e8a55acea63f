//! The capability interface an import is specialised through.

use crate::config::ImportOptions;
use crate::convert::ConverterDecl;
use crate::error::HookResult;
use crate::report::ImportProgress;
use crate::types::{Record, Row, RowContext, Value};

/// Describes one kind of import: where rows go, how columns map, and the hooks
/// that shape each row.
///
/// `E` is the entity type of the storage backend the import writes to. Only
/// [`target`](Self::target) and [`column_mapping`](Self::column_mapping) are
/// required.
///
/// # Example
///
/// ```
/// use skiff_core::{ImportDefinition, Record, Row, RowContext, Value};
/// use skiff_core::error::HookResult;
/// use serde_json::json;
///
/// struct ProductImport;
///
/// impl ImportDefinition<Record> for ProductImport {
///     fn target(&self) -> &str {
///         "products"
///     }
///
///     fn column_mapping(&self) -> Value {
///         json!({"namey": "name", "ranky": "rank"})
///     }
///
///     fn preprocess_row(&self, row: Record, _ctx: RowContext) -> HookResult<Option<Row<Record>>> {
///         // Drop rows without a rank.
///         Ok(row.contains_key("rank").then(|| Row::Plain(row)))
///     }
/// }
/// ```
pub trait ImportDefinition<E>: 'static {
    /// Name of the table or collection rows are written to.
    fn target(&self) -> &str;

    /// Column mapping declaration: an object (rename map) or an array
    /// (positional header override).
    fn column_mapping(&self) -> Value;

    /// User options, layered over the engine defaults.
    fn options(&self) -> ImportOptions {
        ImportOptions::default()
    }

    /// Per-field converters, keyed by target field name.
    fn value_converters(&self) -> Vec<(String, ConverterDecl<Self>)>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Shape one mapped record before it is written.
    ///
    /// Returning `Ok(None)` skips the record; it is reported in
    /// [`ImportReport::skipped_rows`](crate::ImportReport::skipped_rows).
    fn preprocess_row(&self, row: Record, _ctx: RowContext) -> HookResult<Option<Row<E>>> {
        Ok(Some(Row::Plain(row)))
    }

    /// Called once per record the backend rejected, after the run.
    fn handle_failed_row(&self, _failed: &mut E) -> HookResult<()> {
        Ok(())
    }

    /// Checked after all chunks were written inside a wrapped run. Returning
    /// `true` rolls the transaction back even though nothing failed.
    fn rollback_requested(&self, _progress: &ImportProgress) -> bool {
        false
    }
}

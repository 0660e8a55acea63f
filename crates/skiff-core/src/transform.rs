//! Per-record transformation: column mapping, value conversion, and the
//! preprocessing hook.

use std::collections::HashMap;

use tracing::trace;

use crate::config::ResolvedOptions;
use crate::convert::ValueConverterMap;
use crate::error::{ImportError, ImportResult};
use crate::traits::ImportDefinition;
use crate::types::{Record, Row, RowContext};

/// State that outlives a single run: the row counter and the skipped rows.
///
/// Owned by the importer and only reset by building a new one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RowState {
    rows_seen: u64,
    skipped: Vec<Record>,
}

impl RowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records seen so far, skipped ones included.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// Original records the preprocessing hook discarded.
    pub fn skipped(&self) -> &[Record] {
        &self.skipped
    }
}

/// Turns decoded records into rows ready for the backend.
#[derive(Debug)]
pub struct RowTransformer<'a> {
    rename: Option<&'a HashMap<String, String>>,
    drop_unmapped: bool,
    converters: &'a ValueConverterMap,
    verbose: bool,
}

impl<'a> RowTransformer<'a> {
    /// Build a transformer for one run.
    ///
    /// A positional mapping has already been applied by the tokenizer, so
    /// only a rename map is applied here.
    pub fn new(options: &'a ResolvedOptions, converters: &'a ValueConverterMap) -> Self {
        Self {
            rename: options.read.key_mapping.as_ref(),
            drop_unmapped: options.read.remove_unmapped_keys.unwrap_or(false),
            converters,
            verbose: options.read.verbose(),
        }
    }

    /// Transform one chunk, preserving order.
    ///
    /// Records the hook discards are appended to `state` in their original
    /// decoded form. A converter or hook error aborts the chunk.
    pub fn transform<D, E>(
        &self,
        definition: &D,
        chunk: Vec<Record>,
        state: &mut RowState,
    ) -> ImportResult<Vec<Row<E>>>
    where
        D: ImportDefinition<E> + ?Sized,
    {
        let mut rows = Vec::with_capacity(chunk.len());

        for original in chunk {
            state.rows_seen += 1;
            let ctx = RowContext {
                row_number: state.rows_seen,
            };

            let mut mapped = self.map_columns(&original);
            self.converters
                .apply(&mut mapped)
                .map_err(ImportError::Hook)?;

            match definition
                .preprocess_row(mapped, ctx)
                .map_err(ImportError::Hook)?
            {
                Some(row) => rows.push(row),
                None => {
                    if self.verbose {
                        trace!(row_number = ctx.row_number, "Row skipped by preprocess hook");
                    }
                    state.skipped.push(original);
                }
            }
        }

        Ok(rows)
    }

    fn map_columns(&self, original: &Record) -> Record {
        let Some(rename) = self.rename else {
            return original.clone();
        };

        let mut mapped = Record::with_capacity(original.len());
        for (key, value) in original {
            match rename.get(key) {
                Some(target) => {
                    mapped.insert(target.clone(), value.clone());
                }
                None if !self.drop_unmapped => {
                    mapped.insert(key.clone(), value.clone());
                }
                None => {}
            }
        }
        mapped
    }
}

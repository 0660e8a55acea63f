//! Option resolution: engine defaults merged with user options, then split
//! into the subset the tokenizer reads and the subset the backend reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ImportOptions;
use crate::error::{ImportError, ImportResult};
use crate::types::Value;

/// Records per chunk unless the user says otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// How source columns become target fields. Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnMapping {
    /// Source column name to target field name. Unmapped columns are dropped.
    Rename(HashMap<String, String>),
    /// Target field names assigned by position, replacing the header row.
    Positional(Vec<String>),
}

impl ColumnMapping {
    /// Build a rename mapping from `(source, target)` pairs.
    pub fn rename<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Rename(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a positional mapping.
    pub fn positional<S: Into<String>, I: IntoIterator<Item = S>>(names: I) -> Self {
        Self::Positional(names.into_iter().map(Into::into).collect())
    }

    /// Interpret a loosely typed mapping declaration.
    ///
    /// An object of strings is a rename map, an array of strings a positional
    /// list. Anything else is a configuration error.
    pub fn from_value(value: &Value) -> ImportResult<Self> {
        match value {
            Value::Object(map) => {
                let mut rename = HashMap::with_capacity(map.len());
                for (source, target) in map {
                    let target = target.as_str().ok_or_else(|| {
                        ImportError::configuration(format!(
                            "column mapping for '{}' must be a field name, got {}",
                            source, target
                        ))
                    })?;
                    rename.insert(source.clone(), target.to_string());
                }
                Ok(Self::Rename(rename))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ImportError::configuration(format!(
                            "positional column mapping entries must be field names, got {}",
                            item
                        ))
                    })
                })
                .collect::<ImportResult<Vec<_>>>()
                .map(Self::Positional),
            other => Err(ImportError::configuration(format!(
                "column mapping must be an object or an array, got {}",
                other
            ))),
        }
    }
}

impl From<ColumnMapping> for Value {
    fn from(mapping: ColumnMapping) -> Self {
        match mapping {
            ColumnMapping::Rename(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
            ColumnMapping::Positional(names) => {
                Value::Array(names.into_iter().map(Value::String).collect())
            }
        }
    }
}

/// Options forwarded to the tokenizer and the row transformer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub chunk_size: Option<usize>,
    pub col_sep: Option<char>,
    pub row_sep: Option<String>,
    pub quote_char: Option<char>,
    pub comment_char: Option<char>,
    pub headers_in_file: Option<bool>,
    pub user_provided_headers: Option<Vec<String>>,
    pub key_mapping: Option<HashMap<String, String>>,
    pub remove_unmapped_keys: Option<bool>,
    pub downcase_header: Option<bool>,
    pub strip_chars_from_headers: Option<String>,
    pub strip_whitespace: Option<bool>,
    pub convert_values_to_numeric: Option<bool>,
    pub remove_empty_values: Option<bool>,
    pub remove_zero_values: Option<bool>,
    pub remove_values_matching: Option<String>,
    pub remove_empty_hashes: Option<bool>,
    pub skip_lines: Option<usize>,
    pub file_encoding: Option<String>,
    pub recursive: Option<bool>,
    pub verbose: Option<bool>,
}

impl ReadOptions {
    /// Effective chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Whether per-record logging is on.
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}

/// Options forwarded to the storage backend's bulk write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub batch_size: Option<usize>,
    pub on_duplicate_key_ignore: Option<bool>,
    pub validate: Option<bool>,
    pub synchronize: Option<bool>,
    pub timestamps: Option<bool>,
}

impl WriteOptions {
    /// Whether validations run (on unless disabled).
    pub fn validate(&self) -> bool {
        self.validate.unwrap_or(true)
    }

    /// Whether duplicate keys are skipped instead of failing.
    pub fn ignore_duplicates(&self) -> bool {
        self.on_duplicate_key_ignore.unwrap_or(false)
    }

    /// Whether timestamp columns are filled in (on unless disabled).
    pub fn timestamps(&self) -> bool {
        self.timestamps.unwrap_or(true)
    }
}

/// The merged configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// Defaults with user overrides applied.
    pub merged: ImportOptions,
    /// The column mapping in force for this run.
    pub column_mapping: ColumnMapping,
    /// Tokenizer subset.
    pub read: ReadOptions,
    /// Backend subset.
    pub write: WriteOptions,
}

impl ResolvedOptions {
    /// Whether the run is wrapped in a single transaction.
    pub fn wrap_in_transaction(&self) -> bool {
        self.merged.wrap_in_transaction.unwrap_or(true)
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> usize {
        self.read.chunk_size()
    }
}

/// Builds [`ResolvedOptions`] from a column mapping and user options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionResolver;

impl OptionResolver {
    /// Engine defaults for the given column mapping.
    pub fn default_options(mapping: &ColumnMapping) -> ImportOptions {
        let mut defaults = ImportOptions {
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            validate: Some(true),
            recursive: Some(false),
            wrap_in_transaction: Some(true),
            ..Default::default()
        };

        match mapping {
            ColumnMapping::Rename(map) => {
                defaults.key_mapping = Some(map.clone());
                defaults.remove_unmapped_keys = Some(true);
            }
            ColumnMapping::Positional(names) => {
                defaults.user_provided_headers = Some(names.clone());
            }
        }

        defaults
    }

    /// Merge defaults with `user` and split the result.
    ///
    /// Fails with a configuration error, before any I/O, when `mapping` is
    /// neither a rename map nor a positional list or when the chunk size is
    /// zero.
    pub fn resolve(user: &ImportOptions, mapping: &Value) -> ImportResult<ResolvedOptions> {
        let column_mapping = ColumnMapping::from_value(mapping)?;
        let merged = Self::default_options(&column_mapping).merged_with(user);

        if merged.chunk_size == Some(0) {
            return Err(ImportError::configuration("chunk_size must be at least 1"));
        }
        if merged.batch_size == Some(0) {
            return Err(ImportError::configuration("batch_size must be at least 1"));
        }

        let read = Self::read_subset(&merged);
        let write = Self::write_subset(&merged);

        Ok(ResolvedOptions {
            merged,
            column_mapping,
            read,
            write,
        })
    }

    /// The keys the tokenizer understands.
    pub fn read_subset(options: &ImportOptions) -> ReadOptions {
        ReadOptions {
            chunk_size: options.chunk_size,
            col_sep: options.col_sep,
            row_sep: options.row_sep.clone(),
            quote_char: options.quote_char,
            comment_char: options.comment_char,
            headers_in_file: options.headers_in_file,
            user_provided_headers: options.user_provided_headers.clone(),
            key_mapping: options.key_mapping.clone(),
            remove_unmapped_keys: options.remove_unmapped_keys,
            downcase_header: options.downcase_header,
            strip_chars_from_headers: options.strip_chars_from_headers.clone(),
            strip_whitespace: options.strip_whitespace,
            convert_values_to_numeric: options.convert_values_to_numeric,
            remove_empty_values: options.remove_empty_values,
            remove_zero_values: options.remove_zero_values,
            remove_values_matching: options.remove_values_matching.clone(),
            remove_empty_hashes: options.remove_empty_hashes,
            skip_lines: options.skip_lines,
            file_encoding: options.file_encoding.clone(),
            recursive: options.recursive,
            verbose: options.verbose,
        }
    }

    /// The keys the storage backend understands.
    pub fn write_subset(options: &ImportOptions) -> WriteOptions {
        WriteOptions {
            batch_size: options.batch_size,
            on_duplicate_key_ignore: options.on_duplicate_key_ignore,
            validate: options.validate,
            synchronize: options.synchronize,
            timestamps: options.timestamps,
        }
    }
}

/// Shorthand for [`OptionResolver::resolve`].
pub fn resolve(user: &ImportOptions, mapping: &Value) -> ImportResult<ResolvedOptions> {
    OptionResolver::resolve(user, mapping)
}

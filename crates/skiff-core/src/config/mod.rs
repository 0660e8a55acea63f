//! Configuration system for skiff imports.
//!
//! [`ImportOptions`] is the user-facing option set. Every field is optional so
//! that user overrides can be layered over engine defaults key by key; see
//! [`resolver`] for the merge and the split into read and write subsets.

pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ImportError, ImportResult};
use crate::types::Value;

pub use resolver::{
    resolve, ColumnMapping, OptionResolver, ReadOptions, ResolvedOptions, WriteOptions,
    DEFAULT_CHUNK_SIZE,
};

/// Import options as supplied by the user or loaded from a file.
///
/// Keys outside the known set are kept in `extra` so they survive the merge,
/// but they are never forwarded to the tokenizer or the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Wrap the whole run in a single transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_in_transaction: Option<bool>,

    // Source reading
    /// Records per chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// Column delimiter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col_sep: Option<char>,
    /// Row delimiter: `"\n"`, `"\r\n"`, or a single byte.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_sep: Option<String>,
    /// Quote character.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_char: Option<char>,
    /// Lines starting with this character are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_char: Option<char>,
    /// Whether the first (non-skipped) line is a header row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers_in_file: Option<bool>,
    /// Positional header override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_provided_headers: Option<Vec<String>>,
    /// Source column name to target field name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_mapping: Option<HashMap<String, String>>,
    /// Drop columns that have no entry in `key_mapping`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_unmapped_keys: Option<bool>,
    /// Lowercase header names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downcase_header: Option<bool>,
    /// Regex whose matches are removed from header names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_chars_from_headers: Option<String>,
    /// Trim surrounding whitespace from headers and values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_whitespace: Option<bool>,
    /// Turn numeric-looking values into numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert_values_to_numeric: Option<bool>,
    /// Drop empty values from records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_empty_values: Option<bool>,
    /// Drop numeric zero values from records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_zero_values: Option<bool>,
    /// Drop values matching this regex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_values_matching: Option<String>,
    /// Do not emit records left with no fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_empty_hashes: Option<bool>,
    /// Number of leading lines to ignore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_lines: Option<usize>,
    /// Source encoding label (e.g. `"windows-1252"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_encoding: Option<String>,
    /// Descend into subdirectories when the source is a directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    /// Log every decoded record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    // Storage writing
    /// Rows per backend write round within a chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Silently skip rows that collide with a unique key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_duplicate_key_ignore: Option<bool>,
    /// Run backend validations before writing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
    /// Ask the backend to report assigned ids back into entities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronize: Option<bool>,
    /// Populate timestamp columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<bool>,

    /// Unrecognised keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

macro_rules! merge_fields {
    ($base:expr, $over:expr, [$($field:ident),* $(,)?]) => {
        $(
            if $over.$field.is_some() {
                $base.$field = $over.$field.clone();
            }
        )*
    };
}

impl ImportOptions {
    /// Load options from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> ImportResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ImportError::Configuration(e.to_string()))
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ImportError::Configuration(e.to_string())),
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| ImportError::Configuration(e.to_string())),
            _ => Err(ImportError::Configuration(
                "Unsupported options file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load options from environment variables.
    ///
    /// Unset or unparsable variables leave the corresponding option unset.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(size) = std::env::var("SKIFF_CHUNK_SIZE") {
            options.chunk_size = size.parse().ok();
        }
        if let Ok(wrap) = std::env::var("SKIFF_WRAP_IN_TRANSACTION") {
            options.wrap_in_transaction = parse_flag(&wrap);
        }
        if let Ok(validate) = std::env::var("SKIFF_VALIDATE") {
            options.validate = parse_flag(&validate);
        }
        if let Ok(sep) = std::env::var("SKIFF_COL_SEP") {
            let mut chars = sep.chars();
            options.col_sep = match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ if sep == "\\t" => Some('\t'),
                _ => None,
            };
        }
        if let Ok(encoding) = std::env::var("SKIFF_FILE_ENCODING") {
            options.file_encoding = Some(encoding);
        }

        options
    }

    /// Build options using builder pattern.
    pub fn builder() -> ImportOptionsBuilder {
        ImportOptionsBuilder::default()
    }

    /// Shallow merge: every option set in `overrides` replaces the value here.
    ///
    /// Nested values (mappings, header lists) are replaced wholesale, never
    /// merged.
    pub fn merged_with(&self, overrides: &ImportOptions) -> ImportOptions {
        let mut merged = self.clone();
        merge_fields!(
            merged,
            overrides,
            [
                wrap_in_transaction,
                chunk_size,
                col_sep,
                row_sep,
                quote_char,
                comment_char,
                headers_in_file,
                user_provided_headers,
                key_mapping,
                remove_unmapped_keys,
                downcase_header,
                strip_chars_from_headers,
                strip_whitespace,
                convert_values_to_numeric,
                remove_empty_values,
                remove_zero_values,
                remove_values_matching,
                remove_empty_hashes,
                skip_lines,
                file_encoding,
                recursive,
                verbose,
                batch_size,
                on_duplicate_key_ignore,
                validate,
                synchronize,
                timestamps,
            ]
        );
        for (key, value) in &overrides.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for ImportOptions.
#[derive(Default)]
pub struct ImportOptionsBuilder {
    options: ImportOptions,
}

impl ImportOptionsBuilder {
    /// Set whether the run is wrapped in one transaction.
    pub fn wrap_in_transaction(mut self, wrap: bool) -> Self {
        self.options.wrap_in_transaction = Some(wrap);
        self
    }

    /// Set the number of records per chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.options.chunk_size = Some(size);
        self
    }

    /// Set the column delimiter.
    pub fn col_sep(mut self, sep: char) -> Self {
        self.options.col_sep = Some(sep);
        self
    }

    /// Set the row delimiter.
    pub fn row_sep(mut self, sep: impl Into<String>) -> Self {
        self.options.row_sep = Some(sep.into());
        self
    }

    /// Set the quote character.
    pub fn quote_char(mut self, quote: char) -> Self {
        self.options.quote_char = Some(quote);
        self
    }

    /// Set whether the source has a header row.
    pub fn headers_in_file(mut self, headers: bool) -> Self {
        self.options.headers_in_file = Some(headers);
        self
    }

    /// Set whether values are trimmed.
    pub fn strip_whitespace(mut self, strip: bool) -> Self {
        self.options.strip_whitespace = Some(strip);
        self
    }

    /// Set whether numeric-looking values become numbers.
    pub fn convert_values_to_numeric(mut self, convert: bool) -> Self {
        self.options.convert_values_to_numeric = Some(convert);
        self
    }

    /// Set whether empty values are dropped.
    pub fn remove_empty_values(mut self, remove: bool) -> Self {
        self.options.remove_empty_values = Some(remove);
        self
    }

    /// Set the number of leading lines to ignore.
    pub fn skip_lines(mut self, lines: usize) -> Self {
        self.options.skip_lines = Some(lines);
        self
    }

    /// Set the source encoding label.
    pub fn file_encoding(mut self, label: impl Into<String>) -> Self {
        self.options.file_encoding = Some(label.into());
        self
    }

    /// Set whether directory sources are walked recursively.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.options.recursive = Some(recursive);
        self
    }

    /// Set per-record debug logging.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = Some(verbose);
        self
    }

    /// Set the backend batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.options.batch_size = Some(size);
        self
    }

    /// Set whether duplicate keys are ignored.
    pub fn on_duplicate_key_ignore(mut self, ignore: bool) -> Self {
        self.options.on_duplicate_key_ignore = Some(ignore);
        self
    }

    /// Set whether backend validations run.
    pub fn validate(mut self, validate: bool) -> Self {
        self.options.validate = Some(validate);
        self
    }

    /// Set whether timestamp columns are populated.
    pub fn timestamps(mut self, timestamps: bool) -> Self {
        self.options.timestamps = Some(timestamps);
        self
    }

    /// Set an option this crate does not interpret.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.extra.insert(key.into(), value);
        self
    }

    /// Build the options.
    pub fn build(self) -> ImportOptions {
        self.options
    }
}

//! skiff-core - Core library for skiff.
//!
//! This crate provides the import pipeline, the storage and tokenizer traits,
//! and option handling for skiff, a chunked and transactional CSV importer.
//!
//! # Example
//!
//! ```ignore
//! use skiff_core::{ImportDefinition, Importer, Record, Source, Value};
//! use serde_json::json;
//!
//! struct ProductImport;
//!
//! impl ImportDefinition<Record> for ProductImport {
//!     fn target(&self) -> &str {
//!         "products"
//!     }
//!
//!     fn column_mapping(&self) -> Value {
//!         json!({"namey": "name", "ranky": "rank", "description": "description"})
//!     }
//! }
//!
//! let mut importer = Importer::new(ProductImport, storage);
//! let report = importer.import(Source::path("products.csv"))?;
//! println!("inserted {}", report.total_inserted());
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod importer;
pub mod report;
pub mod source;
pub mod traits;
pub mod transaction;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use config::{ImportOptions, ReadOptions, ResolvedOptions, WriteOptions};
pub use convert::{ConverterDecl, ValueConverter, ValueConverterMap};
pub use error::{ErrorCode, HookError, HookResult, ImportError, ImportResult};
pub use importer::Importer;
pub use report::{ImportProgress, ImportReport};
pub use source::{ChunkedSource, CsvTokenizer, Source};
pub use traits::{ImportDefinition, Storage, Tokenizer};
pub use transaction::{TransactionStatus, TransactionalRunner};
pub use types::{ChunkOutcome, Record, RecordId, Row, RowContext, Value};

//! End-to-end import tests against the bundled backends.

use std::path::PathBuf;

use serde_json::json;
use skiff_core::error::HookResult;
use skiff_core::{
    ConverterDecl, ErrorCode, ImportDefinition, ImportError, ImportOptions, ImportProgress,
    Importer, Record, Row, RowContext, Source, TransactionStatus, Value,
};
use skiff_stores::{ColumnDef, Entity, MemoryStore, SqliteStore, TableSchema, ValidationRule};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn products_schema() -> TableSchema {
    TableSchema::new("products")
        .column(ColumnDef::new("name").required())
        .column(ColumnDef::new("rank").required().unique())
        .column(ColumnDef::new("description"))
        .with_timestamps()
}

fn sqlite_store() -> SqliteStore {
    SqliteStore::in_memory()
        .unwrap()
        .with_table(products_schema())
        .unwrap()
}

#[derive(Default)]
struct ProductImport {
    options: ImportOptions,
    skip_rank_above: Option<i64>,
    shout_names: bool,
    dry_run: bool,
}

impl ProductImport {
    fn with_options(options: ImportOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    fn shout(&self, value: Value) -> HookResult<Value> {
        match value {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(format!("cannot shout {}", other).into()),
        }
    }
}

impl ImportDefinition<Entity> for ProductImport {
    fn target(&self) -> &str {
        "products"
    }

    fn column_mapping(&self) -> Value {
        json!({"namey": "name", "ranky": "rank", "description": "description"})
    }

    fn options(&self) -> ImportOptions {
        self.options.clone()
    }

    fn value_converters(&self) -> Vec<(String, ConverterDecl<Self>)> {
        if !self.shout_names {
            return Vec::new();
        }
        vec![
            ("name".to_string(), ConverterDecl::Method(Self::shout)),
            ("description".to_string(), ConverterDecl::None),
        ]
    }

    fn preprocess_row(&self, row: Record, _ctx: RowContext) -> HookResult<Option<Row<Entity>>> {
        let rank = row.get("rank").and_then(Value::as_i64);
        if let (Some(limit), Some(rank)) = (self.skip_rank_above, rank) {
            if rank > limit {
                return Ok(None);
            }
        }
        Ok(Some(Row::Native(Entity::new(row))))
    }

    fn handle_failed_row(&self, failed: &mut Entity) -> HookResult<()> {
        failed
            .fields
            .insert("import_note".to_string(), json!("needs review"));
        Ok(())
    }

    fn rollback_requested(&self, _progress: &ImportProgress) -> bool {
        self.dry_run
    }
}

#[test]
fn test_imports_valid_products() {
    init_tracing();
    let mut importer = Importer::new(ProductImport::default(), sqlite_store());
    let report = importer.import(fixture("products.csv")).unwrap();

    assert_eq!(report.total_inserted(), 3);
    assert_eq!(report.inserted_ids(), &[1, 2, 3]);
    assert_eq!(report.chunks(), 1);
    assert!(report.invalid_records().is_empty());
    assert_eq!(report.transaction(), TransactionStatus::Committed);

    let rows = importer.storage().rows("products").unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("name"), Some(&json!("Product 1")));
    assert_eq!(rows[0].get("rank"), Some(&json!(1)));
    assert_eq!(rows[0].get("description"), Some(&json!("The first product")));
    assert!(rows[0].get("created_at").is_some());
}

#[test]
fn test_invalid_products_are_reported() {
    init_tracing();
    let mut importer = Importer::new(ProductImport::default(), sqlite_store());
    let report = importer.import(fixture("invalid_products.csv")).unwrap();

    assert_eq!(report.total_inserted(), 2);
    assert_eq!(report.invalid_records().len(), 5);
    for failed in report.invalid_records() {
        assert!(!failed.is_valid());
        assert!(failed
            .errors
            .iter()
            .all(|e| e.rule == ValidationRule::Presence));
        assert_eq!(failed.get("import_note"), Some(&json!("needs review")));
    }
    assert_eq!(importer.storage().count("products").unwrap(), 2);
}

#[test]
fn test_invalid_products_without_validation() {
    init_tracing();
    let definition =
        ProductImport::with_options(ImportOptions::builder().validate(false).build());
    let mut importer = Importer::new(definition, sqlite_store());
    let report = importer.import(fixture("invalid_products.csv")).unwrap();

    assert!(report.invalid_records().is_empty());
    assert_eq!(report.total_inserted(), 7);
    assert_eq!(importer.rows_seen(), 7);
}

const DUPLICATE_IN_THIRD_CHUNK: &str = "namey,ranky\na,1\nb,2\nc,3\nd,4\ne,1\n";

fn unvalidated_pairs(wrap: bool) -> ProductImport {
    ProductImport::with_options(
        ImportOptions::builder()
            .chunk_size(2)
            .validate(false)
            .wrap_in_transaction(wrap)
            .build(),
    )
}

#[test]
fn test_wrapped_run_persists_nothing_on_fatal_error() {
    init_tracing();
    for store in [
        Box::new(sqlite_store()) as Box<dyn CountRows>,
        Box::new(MemoryStore::new().with_table(products_schema())),
    ] {
        let count = store.run(unvalidated_pairs(true), DUPLICATE_IN_THIRD_CHUNK);
        assert_eq!(count, 0);
    }
}

#[test]
fn test_unwrapped_run_keeps_earlier_chunks() {
    init_tracing();
    for store in [
        Box::new(sqlite_store()) as Box<dyn CountRows>,
        Box::new(MemoryStore::new().with_table(products_schema())),
    ] {
        let count = store.run(unvalidated_pairs(false), DUPLICATE_IN_THIRD_CHUNK);
        assert_eq!(count, 4);
    }
}

/// Runs an import expected to fail and counts what was left behind.
trait CountRows {
    fn run(self: Box<Self>, definition: ProductImport, csv: &str) -> usize;
}

impl CountRows for SqliteStore {
    fn run(self: Box<Self>, definition: ProductImport, csv: &str) -> usize {
        let mut importer = Importer::new(definition, *self);
        let err = importer.import(Source::text(csv)).unwrap_err();
        assert!(err.is_constraint_violation(), "{err}");
        importer.storage().count("products").unwrap()
    }
}

impl CountRows for MemoryStore {
    fn run(self: Box<Self>, definition: ProductImport, csv: &str) -> usize {
        let mut importer = Importer::new(definition, *self);
        let err = importer.import(Source::text(csv)).unwrap_err();
        assert!(err.is_constraint_violation(), "{err}");
        importer.storage().count("products").unwrap()
    }
}

#[test]
fn test_skipped_rows_keep_their_source_form() {
    init_tracing();
    let definition = ProductImport {
        skip_rank_above: Some(1),
        ..Default::default()
    };
    let mut importer = Importer::new(definition, MemoryStore::new().with_table(products_schema()));
    let report = importer.import(fixture("products.csv")).unwrap();

    assert_eq!(report.total_inserted(), 1);
    assert_eq!(report.skipped_rows().len(), 2);
    assert_eq!(report.skipped_rows()[0]["namey"], json!("Product 2"));
    assert_eq!(report.skipped_rows()[0]["ranky"], json!(2));
    assert_eq!(importer.rows_seen(), 3);
}

#[test]
fn test_dry_run_rolls_back() {
    init_tracing();
    let definition = ProductImport {
        dry_run: true,
        ..Default::default()
    };
    let mut importer = Importer::new(definition, sqlite_store());
    let report = importer.import(fixture("products.csv")).unwrap();

    assert_eq!(report.transaction(), TransactionStatus::RolledBackByRequest);
    assert_eq!(report.total_inserted(), 3);
    assert_eq!(importer.storage().count("products").unwrap(), 0);
}

#[test]
fn test_method_converters() {
    init_tracing();
    let definition = ProductImport {
        shout_names: true,
        ..Default::default()
    };
    let mut importer = Importer::new(definition, MemoryStore::new().with_table(products_schema()));
    importer.import(fixture("products.csv")).unwrap();

    let rows = importer.storage().rows("products").unwrap();
    assert_eq!(rows[2].get("name"), Some(&json!("PRODUCT 3")));
    assert_eq!(rows[2].get("description"), Some(&json!("The third product")));
}

#[test]
fn test_converter_error_aborts_the_run() {
    init_tracing();
    let definition = ProductImport {
        shout_names: true,
        options: ImportOptions::builder().convert_values_to_numeric(true).build(),
        ..Default::default()
    };
    let mut importer = Importer::new(definition, sqlite_store());
    let err = importer
        .import(Source::text("namey,ranky\n42,1\n"))
        .unwrap_err();

    assert!(matches!(err, ImportError::Hook(_)));
    assert_eq!(importer.storage().count("products").unwrap(), 0);
}

#[test]
fn test_directory_source_into_file_database() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let sources = dir.path().join("incoming");
    std::fs::create_dir(&sources).unwrap();
    std::fs::write(sources.join("01.csv"), "namey,ranky\na,1\nb,2\n").unwrap();
    std::fs::write(sources.join("02.csv"), "namey;ranky\nc;3\n").unwrap();

    let store = SqliteStore::open(dir.path().join("products.db"))
        .unwrap()
        .with_table(products_schema())
        .unwrap();
    let mut importer = Importer::new(ProductImport::default(), store);

    // The second file uses a different separator, so it imports as one
    // unmapped column and every row fails validation. Both files share one
    // chunk stream.
    let report = importer.import(sources.as_path()).unwrap();
    assert_eq!(report.chunks(), 1);
    assert_eq!(report.total_inserted(), 2);
    assert_eq!(report.invalid_records().len(), 1);
}

#[test]
fn test_failed_commit_rolls_the_run_back() {
    init_tracing();
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE categories (id INTEGER PRIMARY KEY);
         INSERT INTO categories (id) VALUES (1);
         CREATE TABLE products (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name,
             rank REFERENCES categories (id) DEFERRABLE INITIALLY DEFERRED,
             description,
             created_at TEXT,
             updated_at TEXT
         );",
    )
    .unwrap();
    let store = SqliteStore::from_connection(conn)
        .with_table(products_schema())
        .unwrap();
    let mut importer = Importer::new(ProductImport::default(), store);

    // The foreign key is only checked at COMMIT.
    let err = importer
        .import(Source::text("namey,ranky\na,99\n"))
        .unwrap_err();
    assert!(matches!(err, ImportError::Backend { .. }));
    assert_eq!(err.code(), ErrorCode::DbConstraintViolation);
    assert!(importer.storage().connection().is_autocommit());
    assert_eq!(importer.storage().count("products").unwrap(), 0);

    let report = importer
        .import(Source::text("namey,ranky\nb,1\n"))
        .unwrap();
    assert_eq!(report.total_inserted(), 1);
    assert_eq!(report.transaction(), TransactionStatus::Committed);
}

#[test]
fn test_options_loaded_from_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("import.toml");
    std::fs::write(&path, "chunk_size = 1\ncol_sep = \";\"\nvalidate = true\n").unwrap();

    let definition = ProductImport::with_options(ImportOptions::from_file(&path).unwrap());
    let mut importer = Importer::new(definition, MemoryStore::new().with_table(products_schema()));
    let report = importer
        .import(Source::text("namey;ranky\na;1\nb;2\nc;3\n"))
        .unwrap();

    assert_eq!(report.chunks(), 3);
    assert_eq!(report.total_inserted(), 3);
}

#[test]
fn test_report_serializes() {
    init_tracing();
    let mut importer = Importer::new(ProductImport::default(), sqlite_store());
    let report = importer.import(fixture("invalid_products.csv")).unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["total_inserted"], json!(2));
    assert_eq!(value["transaction"], json!("committed"));
    assert_eq!(value["invalid_records"].as_array().unwrap().len(), 5);
    assert_eq!(
        value["invalid_records"][0]["errors"][0]["rule"],
        json!("presence")
    );
}

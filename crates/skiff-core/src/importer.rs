//! The import orchestrator.

use std::sync::Arc;

use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::config::{resolve, ResolvedOptions};
use crate::convert::ValueConverterMap;
use crate::error::{ImportError, ImportResult};
use crate::report::{ImportProgress, ImportReport, ResultAggregator};
use crate::source::{ChunkedSource, CsvTokenizer, Source};
use crate::traits::{ImportDefinition, Storage, Tokenizer};
use crate::transaction::{TransactionStatus, TransactionalRunner};
use crate::transform::{RowState, RowTransformer};
use crate::types::Record;

/// Runs imports described by `D` into the storage backend `S`.
///
/// The row counter and the skipped rows live as long as the importer: a
/// second `import` call continues counting where the first stopped.
pub struct Importer<D, S> {
    definition: Arc<D>,
    storage: S,
    tokenizer: Box<dyn Tokenizer>,
    state: RowState,
}

impl<D, S> Importer<D, S>
where
    S: Storage,
    D: ImportDefinition<S::Entity>,
{
    /// Create an importer reading CSV with [`CsvTokenizer`].
    pub fn new(definition: D, storage: S) -> Self {
        Self {
            definition: Arc::new(definition),
            storage,
            tokenizer: Box::new(CsvTokenizer::new()),
            state: RowState::new(),
        }
    }

    /// Replace the tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Box::new(tokenizer);
        self
    }

    /// The import definition this importer runs.
    pub fn definition(&self) -> &D {
        &self.definition
    }

    /// The storage backend, for inspecting what was written.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the storage backend between runs.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Consume the importer and hand back its backend.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Records seen by this importer, skipped ones included.
    pub fn rows_seen(&self) -> u64 {
        self.state.rows_seen()
    }

    /// Original records the preprocessing hook discarded, across every run.
    pub fn skipped_rows(&self) -> &[Record] {
        self.state.skipped()
    }

    /// Import every record of `source`.
    ///
    /// Options are resolved before the source is opened, so an invalid column
    /// mapping fails without any I/O. Records rejected by validation are part
    /// of the report; source, backend and hook errors abort the run and, when
    /// the run is wrapped, roll back everything it wrote.
    pub fn import(&mut self, source: impl Into<Source>) -> ImportResult<ImportReport<S::Entity>> {
        let source = source.into();
        let run_id = Uuid::new_v4();
        let span = info_span!("import", %run_id, table = self.definition.target());
        let _enter = span.enter();

        let resolved = self.resolve_options()?;
        let converters =
            ValueConverterMap::build(self.definition.value_converters(), &self.definition);
        info!(
            chunk_size = resolved.chunk_size(),
            wrap_in_transaction = resolved.wrap_in_transaction(),
            ?source,
            "Import started"
        );

        let Self {
            definition,
            storage,
            tokenizer,
            state,
        } = self;
        let definition: &D = definition;
        let transformer = RowTransformer::new(&resolved, &converters);
        let chunked = ChunkedSource::new(tokenizer.as_ref());

        let ((mut aggregator, _), transaction) = TransactionalRunner::run(
            resolved.wrap_in_transaction(),
            storage,
            |storage| {
                let mut aggregator = ResultAggregator::new();
                chunked.stream(source, &resolved.read, |chunk| {
                    aggregator.record_chunk();
                    let rows = transformer.transform(definition, chunk, state)?;
                    if rows.is_empty() {
                        debug!(
                            chunk = aggregator.chunks(),
                            "Every row skipped, chunk not written"
                        );
                        return Ok(());
                    }
                    let outcome =
                        storage.bulk_insert(definition.target(), rows, &resolved.write)?;
                    debug!(
                        chunk = aggregator.chunks(),
                        inserted = outcome.inserted,
                        failed = outcome.failed.len(),
                        "Chunk written"
                    );
                    aggregator.add(outcome);
                    Ok(())
                })?;
                let progress = progress(&aggregator, state);
                Ok((aggregator, progress))
            },
            |(_, progress): &(ResultAggregator<S::Entity>, ImportProgress)| {
                definition.rollback_requested(progress)
            },
        )?;

        Self::finish(definition, aggregator, state, run_id, transaction)
    }

    /// Transform and write an already decoded batch, outside any transaction.
    pub fn import_rows(&mut self, rows: Vec<Record>) -> ImportResult<ImportReport<S::Entity>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_rows", %run_id, table = self.definition.target());
        let _enter = span.enter();

        let resolved = self.resolve_options()?;
        let converters =
            ValueConverterMap::build(self.definition.value_converters(), &self.definition);
        let transformer = RowTransformer::new(&resolved, &converters);

        let mut aggregator = ResultAggregator::new();
        aggregator.record_chunk();
        let rows = transformer.transform(self.definition.as_ref(), rows, &mut self.state)?;
        if !rows.is_empty() {
            let outcome = self
                .storage
                .bulk_insert(self.definition.target(), rows, &resolved.write)?;
            aggregator.add(outcome);
        }

        Self::finish(
            &self.definition,
            aggregator,
            &self.state,
            run_id,
            TransactionStatus::NotWrapped,
        )
    }

    fn resolve_options(&self) -> ImportResult<ResolvedOptions> {
        resolve(&self.definition.options(), &self.definition.column_mapping())
    }

    fn finish(
        definition: &D,
        mut aggregator: ResultAggregator<S::Entity>,
        state: &RowState,
        run_id: Uuid,
        transaction: TransactionStatus,
    ) -> ImportResult<ImportReport<S::Entity>> {
        for failed in aggregator.invalid_records_mut() {
            definition
                .handle_failed_row(failed)
                .map_err(ImportError::Hook)?;
        }

        let report = aggregator.finish(
            run_id,
            state.rows_seen(),
            state.skipped().to_vec(),
            transaction,
        );
        info!(
            chunks = report.chunks(),
            inserted = report.total_inserted(),
            failed = report.invalid_records().len(),
            skipped = report.skipped_rows().len(),
            %transaction,
            "Import finished"
        );
        Ok(report)
    }
}

fn progress<E>(aggregator: &ResultAggregator<E>, state: &RowState) -> ImportProgress {
    ImportProgress {
        chunks: aggregator.chunks(),
        rows_seen: state.rows_seen(),
        inserted: aggregator.total_inserted(),
        failed: aggregator.failed(),
        skipped: state.skipped().len() as u64,
    }
}

//! Raw layer loading: verbatim landing of extract files with lineage.
//!
//! Per file: idempotency gate → handler lookup → ledger row (lineage FK) →
//! stream → parse → batched insert → completion bookkeeping. Values are
//! never coerced on the way in; missing trailing fields land as empty
//! strings and extra fields are ignored.

pub mod stream_batch;

pub use stream_batch::{BatchExecutor, StreamBatchProcessor, StreamTotals};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::batch::calculate_optimal_batch_size;
use crate::database::{BatchLoader, DbPool, RunStore};
use crate::errors::{EtlError, EtlResult};
use crate::handlers::HandlerRegistry;
use crate::parser::{DelimitedParser, ParserConfig};
use crate::storage::FileStore;
use crate::types::{
    BatchResult, DiscoveredFile, FileLineage, LoadResult, LoadRunStatus, ParsedRow, RunTrigger,
};

/// Per-call knobs; everything else comes from configuration
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Load even when the idempotency store says the file is done
    pub force_reload: bool,
}

/// Shapes parsed rows into raw-table batches and owns the retry policy.
///
/// Retries are batch-scoped: transient database failures back off a fixed
/// delay up to `max_retries`; anything else fails the batch immediately.
struct RawBatchExecutor {
    loader: BatchLoader,
    table: String,
    /// Full column list: lineage FK first, then the declared columns
    columns: Vec<String>,
    declared_columns: usize,
    lineage_fk: i64,
    max_retries: usize,
    retry_delay: Duration,
}

/// Raw fidelity shaping: exactly the declared column count, missing fields
/// as empty strings, extra fields dropped.
fn shape_rows(rows: Vec<ParsedRow>, declared_columns: usize) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| {
            let mut fields = row.fields;
            fields.resize(declared_columns, String::new());
            fields
        })
        .collect()
}

#[async_trait]
impl BatchExecutor for RawBatchExecutor {
    async fn execute(&self, rows: Vec<ParsedRow>, batch_number: usize) -> BatchResult {
        let values = shape_rows(rows, self.declared_columns);

        let mut attempt = 0usize;
        loop {
            let result = self
                .loader
                .insert_raw_batch(
                    &self.table,
                    &self.columns,
                    self.lineage_fk,
                    &values,
                    batch_number,
                )
                .await;

            if result.success || !result.retryable || attempt >= self.max_retries {
                return result;
            }
            attempt += 1;
            warn!(
                batch_number,
                attempt,
                max_retries = self.max_retries,
                "transient batch failure, retrying"
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// Orchestrates per-file raw ingest and multi-file waves
pub struct RawLoaderService {
    store: Arc<dyn FileStore>,
    registry: Arc<HandlerRegistry>,
    runs: RunStore,
    batch_loader: BatchLoader,
    config: AppConfig,
}

impl RawLoaderService {
    pub fn new(
        pool: DbPool,
        store: Arc<dyn FileStore>,
        registry: Arc<HandlerRegistry>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            registry,
            runs: RunStore::new(pool.clone()),
            batch_loader: BatchLoader::new(pool),
            config,
        }
    }

    /// Load one file into its raw table.
    ///
    /// Errors before the ledger row exists (idempotency lookup, missing
    /// handler) surface as `Err`; once ingest has started every outcome is
    /// an `Ok(LoadResult)` with errors accumulated inside, and the ledger
    /// row records success or `last_error`.
    pub async fn load_file(
        &self,
        file: &DiscoveredFile,
        load_run_id: Uuid,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> EtlResult<LoadResult> {
        // 1. Idempotency gate
        if !options.force_reload && !self.config.processing.force_reprocess {
            if self.runs.is_file_processed(file).await? {
                let conflict = EtlError::IdempotencyConflict {
                    key: file.key.clone(),
                    version_id: file.version_id.clone(),
                };
                warn!(key = %file.key, "idempotency conflict, returning empty result");
                return Ok(LoadResult::skipped(conflict.to_string()));
            }
        }

        // 2. Handler lookup
        let handler = self
            .registry
            .get(&file.extract_type)
            .ok_or_else(|| EtlError::HandlerMissing(file.extract_type.clone()))?;

        // 3. Lineage: ledger row id is the FK stamped on every raw row
        let lineage = FileLineage::for_file(file, load_run_id);
        let lineage_fk = self.runs.begin_file(load_run_id, file).await?;
        debug!(key = %file.key, lineage_fk, extract = %lineage.extract_type, "lineage opened");

        let started = Instant::now();

        // 4. Open the byte stream
        let stream = match self.store.open_stream(file).await {
            Ok(stream) => stream,
            Err(e) => {
                self.runs.mark_file_error(lineage_fk, &e.to_string()).await?;
                let mut result = LoadResult::default();
                result.errors.push(e.to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(result);
            }
        };

        // 5. Parse + load through the bounded batch pipeline
        let mut parser = DelimitedParser::new(
            stream,
            ParserConfig::from(&self.config.csv),
            file.key.clone(),
        );

        let mut columns = vec!["load_run_file_id".to_string()];
        columns.extend(handler.columns.iter().map(|c| c.to_string()));

        let executor = Arc::new(RawBatchExecutor {
            loader: self.batch_loader.clone(),
            table: handler.table_name.clone(),
            declared_columns: handler.columns.len(),
            columns,
            lineage_fk,
            max_retries: self.config.error_handling.max_retries,
            retry_delay: Duration::from_millis(self.config.error_handling.retry_delay_ms),
        });

        let batch_size = calculate_optimal_batch_size(
            handler.columns.len() + 1,
            self.config.processing.batch_size,
        );
        let processor = StreamBatchProcessor::new(
            batch_size,
            self.config.processing.max_queue_size,
            self.config.error_handling.continue_on_error,
        );

        let totals = processor
            .process_with_cancel(&mut parser, executor, cancel)
            .await?;

        // 6. Completion bookkeeping
        let mut result = LoadResult {
            total_rows: totals.total_rows,
            successful_batches: totals.successful_batches,
            failed_batches: totals.failed_batches,
            errors: totals.errors,
            warnings: parser.warnings().to_vec(),
            duration_ms: started.elapsed().as_millis() as u64,
            bytes_processed: parser.bytes_read(),
            peak_buffered_rows: totals.peak_buffered_rows,
        };
        if let Some(stream_error) = totals.stream_error {
            result.errors.push(stream_error);
        }
        if totals.cancelled {
            result.warnings.push("load cancelled".to_string());
        }

        let clean = result.errors.is_empty() && result.failed_batches == 0 && !totals.cancelled;
        if clean {
            // Fully landed; the idempotency record closes
            self.runs
                .mark_file_completed(lineage_fk, totals.rows_inserted as i64)
                .await?;
            info!(
                key = %file.key,
                rows = totals.rows_inserted,
                batches = result.successful_batches,
                duration_ms = result.duration_ms,
                "file loaded"
            );
        } else {
            // Successful batches stay (append-only raw layer); the ledger
            // row stays open so a restart re-ingests the whole file
            let summary = if let Some(first) = result.errors.first() {
                first.clone()
            } else if totals.cancelled {
                "cancelled".to_string()
            } else {
                format!("{} batches failed", result.failed_batches)
            };
            self.runs.mark_file_error(lineage_fk, &summary).await?;
            warn!(key = %file.key, error = %summary, "file load incomplete");
        }

        Ok(result)
    }

    /// Load files in concurrency-bounded waves of `max_concurrent_files`;
    /// each wave completes before the next starts.
    pub async fn load_files(
        &self,
        files: &[DiscoveredFile],
        load_run_id: Uuid,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> Vec<(DiscoveredFile, EtlResult<LoadResult>)> {
        let wave_size = self.config.processing.max_concurrent_files.max(1);
        let mut results = Vec::with_capacity(files.len());

        for wave in files.chunks(wave_size) {
            if cancel.is_cancelled() {
                break;
            }
            let futures: Vec<_> = wave
                .iter()
                .map(|file| self.load_file(file, load_run_id, options, cancel))
                .collect();
            let wave_results = futures::future::join_all(futures).await;
            for (file, result) in wave.iter().cloned().zip(wave_results) {
                results.push((file, result));
            }
        }
        results
    }

    /// Full run: create the load run, ingest all files, close the run.
    pub async fn execute_run(
        &self,
        files: &[DiscoveredFile],
        trigger: RunTrigger,
        options: &LoadOptions,
        cancel: &CancellationToken,
    ) -> EtlResult<(Uuid, Vec<(DiscoveredFile, EtlResult<LoadResult>)>)> {
        let run = self.runs.create_load_run(trigger, None).await?;
        let results = self
            .load_files(files, run.load_run_id, options, cancel)
            .await;

        let total_rows: i64 = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|r| r.total_rows as i64)
            .sum();
        let any_failed = results.iter().any(|(_, r)| match r {
            Ok(result) => !result.errors.is_empty() || result.failed_batches > 0,
            Err(_) => true,
        });

        let status = if cancel.is_cancelled() {
            LoadRunStatus::Cancelled
        } else if any_failed {
            LoadRunStatus::Failed
        } else {
            LoadRunStatus::Completed
        };

        self.runs
            .finish_load_run(run.load_run_id, status, results.len() as i64, total_rows, None)
            .await?;

        Ok((run.load_run_id, results))
    }
}

//! Staging layer: typed, validated, deduplicated rows out of the raw tables.
//!
//! The transform for one extract runs strictly sequential batches - natural
//! key dedup needs ordered observation, so batches are never parallelised
//! within a run. Idempotency comes from the staging-run record: a completed
//! (load_run_id, extract_type) pair replays its stored result without
//! touching the warehouse again.

pub mod dedup;
pub mod transform;
pub mod validate;

pub use transform::{
    ColumnTransformation, RowTransform, TargetType, TransformEngine, TransformedRow, TypedValue,
    ValueTransform,
};
pub use validate::{RowValidation, RuleCheck, ValidationEngine, ValidationRule};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::batch::calculate_optimal_batch_size;
use crate::database::{
    DbPool, RawQueryBuilder, RejectionHandler, RejectionSummary, RunStore, StagingLoader,
};
use crate::errors::{EtlError, EtlResult};
use crate::handlers::{ExtractHandler, HandlerRegistry};
use crate::types::{RawRecord, RejectedRow, TransformResult, ValidationFailure};

/// Cap on retained warning messages per transform result
const MAX_RESULT_WARNINGS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Transform again even when a completed staging run exists
    pub force_reprocess: bool,
}

/// Orchestrates the batched raw→staging flow for one extract at a time
pub struct StagingTransformerService {
    pool: DbPool,
    registry: Arc<HandlerRegistry>,
    runs: RunStore,
    rejections: RejectionHandler,
    loader: StagingLoader,
    config: AppConfig,
}

impl StagingTransformerService {
    pub fn new(pool: DbPool, registry: Arc<HandlerRegistry>, config: AppConfig) -> Self {
        Self {
            runs: RunStore::new(pool.clone()),
            rejections: RejectionHandler::new(pool.clone()),
            loader: StagingLoader::new(pool.clone()),
            pool,
            registry,
            config,
        }
    }

    /// Transform one extract's raw rows for a load run into staging.
    ///
    /// Always resolves with a `TransformResult`; a fatal error marks the
    /// staging run failed and lands in `result.errors` instead of
    /// propagating. Only bookkeeping breakage (no handler, run row cannot
    /// be created) surfaces as `Err`.
    pub async fn transform_extract(
        &self,
        extract_type: &str,
        load_run_id: Uuid,
        options: &TransformOptions,
        cancel: &CancellationToken,
    ) -> EtlResult<TransformResult> {
        let handler = self
            .registry
            .get(extract_type)
            .ok_or_else(|| EtlError::HandlerMissing(extract_type.to_string()))?;

        // 1. Replay gate: a completed run's stored result is authoritative
        if !options.force_reprocess && !self.config.processing.force_reprocess {
            if let Some(previous) = self
                .runs
                .find_completed_staging_run(load_run_id, extract_type)
                .await?
            {
                if let Some(json) = previous.result_json {
                    match serde_json::from_value::<TransformResult>(json) {
                        Ok(cached) => {
                            info!(
                                extract_type,
                                %load_run_id,
                                "staging run already completed, returning stored result"
                            );
                            return Ok(cached);
                        }
                        Err(e) => {
                            warn!(extract_type, error = %e, "stored result unreadable, reprocessing");
                        }
                    }
                }
            }
        }

        let staging_run_id = self
            .runs
            .begin_staging_run(
                load_run_id,
                extract_type,
                &handler.table_name,
                &handler.staging_table(),
            )
            .await?;

        // 2. Setup
        self.rejections.ensure_table().await?;

        let started = Instant::now();
        let mut result = TransformResult {
            staging_run_id: Some(staging_run_id),
            ..Default::default()
        };

        match self
            .run_batches(&handler, load_run_id, &mut result, cancel)
            .await
        {
            Ok(()) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                self.runs
                    .complete_staging_run(staging_run_id, &result)
                    .await?;
                info!(
                    extract_type,
                    rows_read = result.rows_read,
                    rows_transformed = result.rows_transformed,
                    rows_rejected = result.rows_rejected,
                    rows_deduplicated = result.rows_deduplicated,
                    duration_ms = result.duration_ms,
                    "staging transform completed"
                );
                Ok(result)
            }
            Err(e) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                let message = e.to_string();
                result.errors.push(message.clone());
                error!(extract_type, error = %message, "staging transform failed");
                self.runs.fail_staging_run(staging_run_id, &message).await?;
                Ok(result)
            }
        }
    }

    /// The batch loop. Counters accumulate on `result` so a fatal error
    /// still reports partial progress.
    async fn run_batches(
        &self,
        handler: &ExtractHandler,
        load_run_id: Uuid,
        result: &mut TransformResult,
        cancel: &CancellationToken,
    ) -> EtlResult<()> {
        // 3. Source scope and count
        let file_ids = self
            .runs
            .processed_file_ids(load_run_id, &handler.extract_type)
            .await?;
        if file_ids.is_empty() {
            info!(
                extract_type = %handler.extract_type,
                "no processed files for this run, nothing to transform"
            );
            return Ok(());
        }

        let columns: Vec<String> = handler.columns.iter().map(|c| c.to_string()).collect();
        let queries = RawQueryBuilder::new(&handler.table_name, &columns);
        let total = queries.count_rows(&self.pool, &file_ids).await?;

        let data_columns: Vec<(String, TargetType)> = handler
            .transformations
            .iter()
            .map(|t| (t.target_column.clone(), t.target_type))
            .collect();

        // Upsert width is data columns + lineage FK + load_ts
        let batch_size = calculate_optimal_batch_size(
            data_columns.len() + 2,
            self.config.processing.batch_size,
        )
        .max(1);
        let total_batches = (total as usize).div_ceil(batch_size);
        debug!(
            extract_type = %handler.extract_type,
            total_rows = total,
            total_batches,
            batch_size,
            "starting batch loop"
        );

        let engine = TransformEngine::new(handler, &self.config.transformation);
        let validator = ValidationEngine::new(&self.config.validation);

        let mut rejections: Vec<RejectedRow> = Vec::new();
        let mut total_error_rows = 0usize;

        'batches: for batch_index in 0..total_batches {
            if cancel.is_cancelled() {
                self.flush_rejections(result, &mut rejections).await?;
                return Err(EtlError::RunState("transform cancelled".to_string()));
            }

            let offset = (batch_index * batch_size) as i64;
            let records = queries
                .fetch_page(&self.pool, &file_ids, batch_size as i64, offset)
                .await?;
            if records.is_empty() {
                break;
            }

            let mut batch_error_rows = 0usize;
            let mut valid_rows: Vec<TransformedRow> = Vec::with_capacity(records.len());

            for (i, record) in records.iter().enumerate() {
                let row_number = offset + i as i64 + 1;
                result.rows_read += 1;

                // Transform (§ coercion), then validate the survivors
                let transformed =
                    engine.transform_row(record, &handler.transformations, row_number);
                let row = match transformed.row {
                    Some(row) => {
                        self.push_warnings(result, &transformed.failures);
                        row
                    }
                    None => {
                        batch_error_rows += 1;
                        rejections.push(self.rejection_for(
                            load_run_id,
                            handler,
                            record,
                            row_number,
                            "Transformation failed",
                            transformed.failures,
                        ));
                        continue;
                    }
                };

                let validation = validator.validate_row(&row, &handler.transformations);
                self.push_warnings(result, &validation.warnings);
                if !validation.is_valid() {
                    if self.config.validation.fail_on_validation_error {
                        let first = &validation.failures[0];
                        return Err(EtlError::Validation {
                            column: first.column.clone(),
                            message: first.message.clone(),
                        });
                    }
                    batch_error_rows += 1;
                    rejections.push(self.rejection_for(
                        load_run_id,
                        handler,
                        record,
                        row_number,
                        "Validation failed",
                        validation.failures,
                    ));
                    continue;
                }

                valid_rows.push(row);
            }

            total_error_rows += batch_error_rows;

            // 4. Intra-batch dedup by natural key
            let outcome = dedup::dedupe_batch(
                valid_rows,
                &handler.natural_keys,
                handler.updated_at_column.as_deref(),
            );
            result.rows_deduplicated += outcome.duplicates;

            // 5. Upsert the survivors with their lineage
            if !outcome.survivors.is_empty() {
                let row_count = outcome.survivors.len() as u64;
                let rows: Vec<(i64, Vec<TypedValue>)> = outcome
                    .survivors
                    .into_iter()
                    .map(|row| (row.lineage_fk, row.values))
                    .collect();

                let batch_result = self
                    .loader
                    .upsert_batch(
                        &handler.staging_table(),
                        &data_columns,
                        &handler.natural_keys,
                        rows,
                        batch_index + 1,
                    )
                    .await;

                if batch_result.success {
                    result.successful_batches += 1;
                    result.rows_transformed += row_count;
                } else {
                    result.failed_batches += 1;
                    if let Some(error) = batch_result.error {
                        result
                            .errors
                            .push(format!("batch {}: {}", batch_index + 1, error));
                    }
                    if !self.config.error_handling.continue_on_error {
                        warn!(batch = batch_index + 1, "stopping after upsert failure");
                        break 'batches;
                    }
                }
            }

            // 6. Early stop when error thresholds are breached
            if validator.should_stop_validation(batch_error_rows, total_error_rows) {
                let warning = format!(
                    "stopped early: validation error thresholds exceeded ({} total errors)",
                    total_error_rows
                );
                warn!(extract_type = %handler.extract_type, "{}", warning);
                result.warnings.push(warning);
                break;
            }
        }

        // 7. Finalise: flush the rejection trail in bulk
        self.flush_rejections(result, &mut rejections).await?;
        Ok(())
    }

    async fn flush_rejections(
        &self,
        result: &mut TransformResult,
        rejections: &mut Vec<RejectedRow>,
    ) -> EtlResult<()> {
        result.rows_rejected += rejections.len() as u64;
        if rejections.is_empty() {
            return Ok(());
        }

        if self.config.validation.track_rejection_reasons {
            let summary = RejectionSummary::from_rejections(rejections);
            for (reason, count) in summary.top_reasons(5) {
                info!(reason = %reason, count, "rejection reason");
            }
        }

        if self.config.validation.reject_invalid_rows {
            self.rejections.insert_rejections(rejections).await?;
        } else {
            warn!(
                count = rejections.len(),
                "reject_invalid_rows disabled, rejection rows not persisted"
            );
        }
        rejections.clear();
        Ok(())
    }

    fn push_warnings(&self, result: &mut TransformResult, failures: &[ValidationFailure]) {
        for failure in failures {
            if result.warnings.len() >= MAX_RESULT_WARNINGS {
                return;
            }
            result
                .warnings
                .push(format!("{}: {}", failure.column, failure.message));
        }
    }

    fn rejection_for(
        &self,
        load_run_id: Uuid,
        handler: &ExtractHandler,
        record: &RawRecord,
        row_number: i64,
        reason: &str,
        failures: Vec<ValidationFailure>,
    ) -> RejectedRow {
        // Raw data keeps the source column names and verbatim values so a
        // rejection is readable without the raw table at hand
        let raw_data = serde_json::Value::Object(
            handler
                .columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let value = record
                        .field(i)
                        .map(|v| serde_json::Value::String(v.to_string()))
                        .unwrap_or(serde_json::Value::Null);
                    (column.to_string(), value)
                })
                .collect(),
        );

        RejectedRow {
            load_run_id,
            extract_type: handler.extract_type.clone(),
            row_number: Some(row_number),
            source_row_id: Some(record.id.to_string()),
            reason: reason.to_string(),
            failures,
            raw_data,
            rejected_at: Utc::now(),
        }
    }
}

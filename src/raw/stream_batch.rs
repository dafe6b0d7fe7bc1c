//! Stream batch processing with bounded-memory backpressure.
//!
//! One producer (the parser) and one consumer (the batch executor) are
//! linked by a bounded channel of batches. When the channel is full the
//! producer's send blocks, which stops it pulling from the byte stream -
//! memory therefore scales with `batch_size x max_queue_size x row size`,
//! never with file size. Batches reach the executor strictly in
//! accumulation order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::EtlResult;
use crate::parser::DelimitedParser;
use crate::types::{BatchResult, ParsedRow};

/// Executes one accumulated batch; at most one invocation is in flight.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(&self, rows: Vec<ParsedRow>, batch_number: usize) -> BatchResult;
}

/// Accumulated counters for one stream run. All counters are monotonic
/// while the stream is live.
#[derive(Debug, Default)]
pub struct StreamTotals {
    pub total_rows: u64,
    pub rows_inserted: u64,
    pub successful_batches: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
    /// Peak of accumulator + queued rows, for the backpressure bound
    pub peak_buffered_rows: usize,
    /// Set when the byte stream itself failed (per-file fatal)
    pub stream_error: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct ConsumerTotals {
    rows_inserted: u64,
    successful_batches: usize,
    failed_batches: usize,
    errors: Vec<String>,
    stopped_early: bool,
}

pub struct StreamBatchProcessor {
    batch_size: usize,
    max_queue_size: usize,
    continue_on_error: bool,
}

impl StreamBatchProcessor {
    pub fn new(batch_size: usize, max_queue_size: usize, continue_on_error: bool) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_queue_size: max_queue_size.max(1),
            continue_on_error,
        }
    }

    /// Drive the parser to completion (or failure/cancellation) against the
    /// executor. Always resolves with the totals accumulated so far.
    pub async fn process(
        &self,
        parser: &mut DelimitedParser,
        executor: Arc<dyn BatchExecutor>,
    ) -> EtlResult<StreamTotals> {
        self.process_with_cancel(parser, executor, &CancellationToken::new())
            .await
    }

    /// As `process`, observing cancellation at batch boundaries.
    pub async fn process_with_cancel(
        &self,
        parser: &mut DelimitedParser,
        executor: Arc<dyn BatchExecutor>,
        cancel: &CancellationToken,
    ) -> EtlResult<StreamTotals> {
        let (tx, mut rx) = mpsc::channel::<(usize, Vec<ParsedRow>)>(self.max_queue_size);
        let in_flight = Arc::new(AtomicUsize::new(0));

        // Single consumer: strict batch order, one execution at a time
        let consumer_in_flight = Arc::clone(&in_flight);
        let continue_on_error = self.continue_on_error;
        let consumer = tokio::spawn(async move {
            let mut totals = ConsumerTotals::default();
            while let Some((batch_number, rows)) = rx.recv().await {
                let result = executor.execute(rows, batch_number).await;
                consumer_in_flight.fetch_sub(1, Ordering::SeqCst);
                if result.success {
                    totals.successful_batches += 1;
                    totals.rows_inserted += result.rows_inserted;
                } else {
                    totals.failed_batches += 1;
                    if let Some(error) = result.error {
                        totals.errors.push(format!("batch {}: {}", batch_number, error));
                    }
                    if !continue_on_error {
                        warn!(batch_number, "stopping stream after batch failure");
                        totals.stopped_early = true;
                        break;
                    }
                }
            }
            totals
        });

        let mut totals = StreamTotals::default();
        let mut accumulator: Vec<ParsedRow> = Vec::with_capacity(self.batch_size);
        let mut batch_number = 0usize;

        loop {
            if cancel.is_cancelled() {
                debug!("stream cancelled at batch boundary");
                totals.cancelled = true;
                break;
            }

            match parser.next_row().await {
                Ok(Some(row)) => {
                    accumulator.push(row);
                    totals.total_rows += 1;
                    if accumulator.len() >= self.batch_size {
                        batch_number += 1;
                        let batch = std::mem::replace(
                            &mut accumulator,
                            Vec::with_capacity(self.batch_size),
                        );
                        if !self
                            .dispatch(&tx, &in_flight, &mut totals, batch_number, batch)
                            .await
                        {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    if !accumulator.is_empty() {
                        batch_number += 1;
                        let batch = std::mem::take(&mut accumulator);
                        self.dispatch(&tx, &in_flight, &mut totals, batch_number, batch)
                            .await;
                    }
                    break;
                }
                Err(e) => {
                    totals.stream_error = Some(e.to_string());
                    break;
                }
            }
        }

        // Close the channel and wait for the consumer to drain
        drop(tx);
        match consumer.await {
            Ok(consumed) => {
                totals.rows_inserted = consumed.rows_inserted;
                totals.successful_batches = consumed.successful_batches;
                totals.failed_batches = consumed.failed_batches;
                totals.errors.extend(consumed.errors);
            }
            Err(e) => {
                totals
                    .errors
                    .push(format!("batch executor task failed: {}", e));
            }
        }

        Ok(totals)
    }

    /// Queue one batch; blocks when the queue is full (the backpressure
    /// pause). Returns false when the consumer has stopped accepting.
    async fn dispatch(
        &self,
        tx: &mpsc::Sender<(usize, Vec<ParsedRow>)>,
        in_flight: &Arc<AtomicUsize>,
        totals: &mut StreamTotals,
        batch_number: usize,
        batch: Vec<ParsedRow>,
    ) -> bool {
        let queued = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let buffered = queued * self.batch_size;
        if buffered > totals.peak_buffered_rows {
            totals.peak_buffered_rows = buffered;
        }

        if tx.send((batch_number, batch)).await.is_err() {
            // Consumer stopped early (continue_on_error = false)
            in_flight.fetch_sub(1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }
}

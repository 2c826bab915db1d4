//! Batch processing: one [`ResultRecord`] per input entry, in input order,
//! with every failure captured in its own record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::address::{AddressInput, AddressParseError};
use super::pipeline::{FailureKind, FailureReason, LookupOptions, PipelineContext, ResultRecord};
use super::sink::{ResultSink, SinkError};
use crate::config::LookupConfig;

pub const CANCELLED_REASON: &str = "Cancelled before lookup";
const FFIEC_NOT_AVAILABLE: &str = "FFIEC Not Available";

/// One batch item as read from its source, parsed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub original_address: String,
    pub parsed: Result<AddressInput, AddressParseError>,
}

impl BatchEntry {
    /// A `"Street, City State ZIP"` cell. Parse failures become failed records.
    pub fn from_line(line: &str) -> Self {
        let original_address = line.trim().trim_matches('"').trim().to_string();
        Self {
            parsed: AddressInput::parse_line(&original_address),
            original_address,
        }
    }
}

impl From<AddressInput> for BatchEntry {
    fn from(input: AddressInput) -> Self {
        Self {
            original_address: input.one_line(),
            parsed: Ok(input),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items in flight at once; 1 processes strictly in sequence.
    pub concurrency: usize,
    /// Pause between sequential items to respect provider rate limits.
    pub item_delay: Duration,
    pub dry_run: bool,
    pub lookup: LookupOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            item_delay: Duration::ZERO,
            dry_run: false,
            lookup: LookupOptions::default(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &LookupConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            item_delay: config.batch_delay,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// ACS bucket label counts over successful records.
    pub income_levels: BTreeMap<String, usize>,
    /// FFIEC level counts over successful records.
    pub ffiec_levels: BTreeMap<String, usize>,
}

impl BatchSummary {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            let Some(resolved) = record.resolved() else {
                summary.failed += 1;
                continue;
            };
            summary.successful += 1;
            *summary
                .income_levels
                .entry(resolved.income_classification.label().to_string())
                .or_default() += 1;
            let ffiec = resolved
                .tract_income_level
                .map(|level| level.label())
                .unwrap_or(FFIEC_NOT_AVAILABLE);
            *summary.ffiec_levels.entry(ffiec.to_string()).or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub records: Vec<ResultRecord>,
    pub summary: BatchSummary,
    pub dry_run: bool,
    pub cancelled: bool,
}

pub struct BatchOrchestrator {
    context: Arc<PipelineContext>,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(context: Arc<PipelineContext>, options: BatchOptions) -> Self {
        Self {
            context,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops new lookups once `token` is cancelled. In-flight lookups finish.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn run(&self, entries: Vec<BatchEntry>) -> BatchReport {
        let total = entries.len();
        info!(
            total,
            concurrency = self.options.concurrency,
            dry_run = self.options.dry_run,
            "batch started"
        );

        let records = if self.options.concurrency <= 1 {
            self.run_sequential(entries).await
        } else {
            stream::iter(entries.into_iter().enumerate())
                .map(|(index, entry)| self.process(index, total, entry))
                .buffered(self.options.concurrency)
                .collect()
                .await
        };

        let summary = BatchSummary::from_records(&records);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "batch finished"
        );

        BatchReport {
            records,
            summary,
            dry_run: self.options.dry_run,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    /// Runs the batch and hands the records to `sink`, unless this is a dry run.
    /// The report is returned even when the write fails.
    pub async fn run_into(
        &self,
        entries: Vec<BatchEntry>,
        sink: &mut dyn ResultSink,
    ) -> (BatchReport, Result<(), SinkError>) {
        let report = self.run(entries).await;
        if report.dry_run {
            info!(records = report.records.len(), "dry run, results not written");
            return (report, Ok(()));
        }
        let written = sink.write(&report.records);
        if let Err(err) = &written {
            warn!(error = %err, records = report.records.len(), "batch results not written");
        }
        (report, written)
    }

    async fn run_sequential(&self, entries: Vec<BatchEntry>) -> Vec<ResultRecord> {
        let total = entries.len();
        let mut records = Vec::with_capacity(total);
        for (index, entry) in entries.into_iter().enumerate() {
            if index > 0 && !self.options.item_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.item_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
            records.push(self.process(index, total, entry).await);
        }
        records
    }

    async fn process(&self, index: usize, total: usize, entry: BatchEntry) -> ResultRecord {
        let item = index + 1;
        if self.cancel.is_cancelled() {
            debug!(item, "batch cancelled, skipping lookup");
            return ResultRecord::failed(
                entry.parsed.ok(),
                entry.original_address,
                FailureReason::new(FailureKind::Cancelled, CANCELLED_REASON),
            );
        }

        let input = match entry.parsed {
            Ok(input) => input,
            Err(err) => {
                warn!(item, address = %entry.original_address, error = %err, "unparseable address");
                return ResultRecord::failed(
                    None,
                    entry.original_address,
                    FailureReason::new(FailureKind::InvalidAddress, err.to_string()),
                );
            }
        };

        let mut record = self
            .context
            .lookup_observed(&input, self.options.lookup, |state| {
                debug!(item, ?state, "item state");
            })
            .await;
        record.original_address = entry.original_address;

        info!(
            item,
            total,
            success = record.is_success(),
            income = %record.income_label(),
            "address processed"
        );
        record
    }
}

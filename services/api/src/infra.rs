use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tract_income::config::LookupConfig;
use tract_income::error::AppError;
use tract_income::lookup::sink::{CsvResultSink, ResultSink, SinkError};
use tract_income::lookup::{
    BatchEntry, BatchOptions, PipelineContext, ReferenceTableLoader, ResultRecord,
};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) reference: Arc<ReferenceTableLoader>,
    pub(crate) pipeline: Arc<PipelineContext>,
    pub(crate) batch: BatchOptions,
    pub(crate) max_batch_addresses: usize,
}

/// Loads the reference table and wires the providers. Any reference failure is fatal.
pub(crate) fn build_pipeline(
    config: &LookupConfig,
) -> Result<(Arc<ReferenceTableLoader>, Arc<PipelineContext>), AppError> {
    let reference = Arc::new(ReferenceTableLoader::new(config.reference_paths.clone()));
    let pipeline = PipelineContext::from_config(config, &reference)?;
    Ok((reference, Arc::new(pipeline)))
}

/// Every non-empty cell of the CSV is one `"Street, City State ZIP"` address.
pub(crate) fn read_batch_entries(path: &Path) -> Result<Vec<BatchEntry>, AppError> {
    if !path.is_file() {
        return Err(AppError::InvalidInput(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        entries.extend(
            record
                .iter()
                .filter(|cell| !cell.trim().is_empty())
                .map(BatchEntry::from_line),
        );
    }
    info!(addresses = entries.len(), path = %path.display(), "batch input read");
    Ok(entries)
}

/// Cancelled on Ctrl-C so a running batch stops issuing lookups.
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, finishing in-flight lookups");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "unable to listen for interrupt"),
        }
    });
    token
}

/// Creates the CSV only when the batch actually writes, so dry runs leave no file.
pub(crate) struct DeferredCsvSink {
    path: std::path::PathBuf,
    written: bool,
}

impl DeferredCsvSink {
    pub(crate) fn new(path: std::path::PathBuf) -> Self {
        Self {
            path,
            written: false,
        }
    }

    pub(crate) fn written_path(&self) -> Option<&Path> {
        self.written.then_some(self.path.as_path())
    }
}

impl ResultSink for DeferredCsvSink {
    fn write(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        CsvResultSink::create(&self.path)?.write(records)?;
        self.written = true;
        Ok(())
    }
}

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use super::pipeline::ResultRecord;

pub const RESULTS_DIR: &str = "Results";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write results to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode results: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush results: {0}")]
    Flush(#[source] std::io::Error),
}

/// Destination for a finished batch. Skipped entirely on dry runs.
pub trait ResultSink: Send {
    fn write(&mut self, records: &[ResultRecord]) -> Result<(), SinkError>;
}

const HEADER: [&str; 3] = ["original_address", "income_level", "ffiec_income_level"];

#[derive(Serialize)]
struct CsvRow<'a> {
    original_address: &'a str,
    income_level: String,
    ffiec_income_level: String,
}

/// Three-column CSV consumed by downstream systems.
pub struct CsvResultSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> CsvResultSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(inner),
            header_written: false,
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|err| SinkError::Flush(err.into_error()))
    }
}

impl CsvResultSink<File> {
    /// Creates the file and any missing parent directories.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let io_err = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> ResultSink for CsvResultSink<W> {
    fn write(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        if !self.header_written {
            self.writer.write_record(HEADER)?;
            self.header_written = true;
        }
        for record in records {
            self.writer.serialize(CsvRow {
                original_address: &record.original_address,
                income_level: record.income_label(),
                ffiec_income_level: record.ffiec_label(),
            })?;
        }
        self.writer.flush().map_err(SinkError::Flush)
    }
}

/// `Results/census_results_<YYYYmmdd_HHMMSS>.csv` for the given instant.
pub fn default_output_path<Tz>(now: DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    Path::new(RESULTS_DIR).join(format!(
        "census_results_{}.csv",
        now.format("%Y%m%d_%H%M%S")
    ))
}

//! FFIEC tract income reference table: loaded once per process from a CSV or
//! spreadsheet export and shared read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use calamine::{open_workbook_auto, Data, Reader};
use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use super::geography::TractId;

pub const FIPS_COLUMN: &str = "FIPS code";
pub const LEVEL_COLUMN: &str = "Tract income level";

/// Worksheets tried in order before falling back to the first sheet.
const SHEET_CANDIDATES: [&str; 2] = ["2024-2025 tracts", "2025-2024"];
const HEADER_SCAN_ROWS: usize = 10;

/// Official FFIEC tract income level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomeLevel {
    Low,
    Moderate,
    Middle,
    Upper,
}

impl IncomeLevel {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "middle" => Some(Self::Middle),
            "upper" => Some(Self::Upper),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::Middle => "Middle",
            Self::Upper => "Upper",
        }
    }
}

impl fmt::Display for IncomeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for IncomeLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("FFIEC reference file not found (tried {})", display_paths(.tried))]
    ReferenceFileMissing { tried: Vec<PathBuf> },
    #[error("FFIEC reference file {} is malformed: {reason}", .path.display())]
    ReferenceFileMalformed { path: PathBuf, reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Immutable tract identifier to income level mapping.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    entries: HashMap<TractId, IncomeLevel>,
    source: String,
    skipped_rows: usize,
}

impl ReferenceTable {
    pub fn from_entries(
        entries: impl IntoIterator<Item = (TractId, IncomeLevel)>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            source: source.into(),
            skipped_rows: 0,
        }
    }

    pub fn get(&self, tract_id: &TractId) -> Option<IncomeLevel> {
        self.entries.get(tract_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File name the table was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Data rows dropped for a blank or unusable identifier or level.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

/// Reads the first existing candidate file on first use and memoizes the table.
pub struct ReferenceTableLoader {
    candidates: Vec<PathBuf>,
    table: OnceCell<Arc<ReferenceTable>>,
    parses: AtomicUsize,
}

impl ReferenceTableLoader {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            table: OnceCell::new(),
            parses: AtomicUsize::new(0),
        }
    }

    /// A loader that is already populated, for callers that build the table elsewhere.
    pub fn preloaded(table: ReferenceTable) -> Self {
        let loader = Self::new(Vec::new());
        let _ = loader.table.set(Arc::new(table));
        loader
    }

    /// Parses the first existing candidate once and returns the shared table
    /// afterwards. The file read itself has no timeout.
    pub fn load(&self) -> Result<Arc<ReferenceTable>, ReferenceError> {
        self.table
            .get_or_try_init(|| {
                self.parses.fetch_add(1, Ordering::SeqCst);
                self.read().map(Arc::new)
            })
            .cloned()
    }

    /// The table if a previous `load` succeeded.
    pub fn loaded(&self) -> Option<Arc<ReferenceTable>> {
        self.table.get().cloned()
    }

    /// Number of times the file has been parsed.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<ReferenceTable, ReferenceError> {
        let path = self
            .candidates
            .iter()
            .find(|path| path.is_file())
            .ok_or_else(|| ReferenceError::ReferenceFileMissing {
                tried: self.candidates.clone(),
            })?;

        let rows = if is_csv(path) {
            read_csv_rows(path)?
        } else {
            read_sheet_rows(path)?
        };
        let table = build_table(path, rows)?;

        if table.skipped_rows > 0 {
            warn!(
                skipped = table.skipped_rows,
                source = %table.source,
                "reference rows without a usable FIPS code or income level were skipped"
            );
        }
        info!(
            tracts = table.len(),
            source = %table.source,
            "FFIEC tract income levels loaded"
        );
        Ok(table)
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn malformed(path: &Path, reason: impl fmt::Display) -> ReferenceError {
    ReferenceError::ReferenceFileMalformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, ReferenceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| malformed(path, err))?;

    reader
        .records()
        .map(|record| {
            record
                .map(|record| record.iter().map(str::to_string).collect())
                .map_err(|err| malformed(path, err))
        })
        .collect()
}

fn read_sheet_rows(path: &Path) -> Result<Vec<Vec<String>>, ReferenceError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| malformed(path, err))?;
    let names = workbook.sheet_names().to_vec();

    let sheet = SHEET_CANDIDATES
        .iter()
        .find_map(|wanted| names.iter().find(|name| name.as_str() == *wanted))
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| malformed(path, "workbook contains no sheets"))?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| malformed(path, format!("sheet '{sheet}': {err}")))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

/// Spreadsheet cell as text. Whole floats lose their fractional part so
/// numeric FIPS cells read the same as text ones.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 => format!("{value:.0}"),
        other => other.to_string(),
    }
}

fn build_table(path: &Path, rows: Vec<Vec<String>>) -> Result<ReferenceTable, ReferenceError> {
    let column = |row: &[String], name: &str| {
        row.iter()
            .position(|cell| cell.trim().eq_ignore_ascii_case(name))
    };

    let (header_index, fips_col, level_col) = rows
        .iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .find_map(|(index, row)| {
            Some((
                index,
                column(row.as_slice(), FIPS_COLUMN)?,
                column(row.as_slice(), LEVEL_COLUMN)?,
            ))
        })
        .ok_or_else(|| {
            malformed(
                path,
                format!("expected '{FIPS_COLUMN}' and '{LEVEL_COLUMN}' columns"),
            )
        })?;

    let mut entries = HashMap::new();
    let mut skipped_rows = 0;
    for row in rows.iter().skip(header_index + 1) {
        let cell = |index: usize| row.get(index).map(|value| value.trim()).unwrap_or_default();
        let (fips, level) = (cell(fips_col), cell(level_col));
        if fips.is_empty() && level.is_empty() && row.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        match (TractId::parse(fips), IncomeLevel::parse(level)) {
            (Ok(tract_id), Some(level)) => {
                entries.insert(tract_id, level);
            }
            _ => skipped_rows += 1,
        }
    }

    if entries.is_empty() {
        return Err(malformed(path, "no tract rows with a recognized income level"));
    }

    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(ReferenceTable {
        entries,
        source,
        skipped_rows,
    })
}

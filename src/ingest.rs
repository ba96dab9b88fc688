//! Loading message records from CSV, XLSX and JSON exports

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, info};

use crate::error::{ReportError, Result};
use crate::identity::normalize_header;
use crate::models::{ExportRecord, RawMessageRecord};

/// Normalized column names every tabular input must provide
pub const REQUIRED_FIELDS: [&str; 4] = ["date", "from", "subject", "unique id"];

/// Trim, collapse inner whitespace and lowercase a column name
pub fn normalize_column(name: &str) -> String {
    normalize_header(name.trim_start_matches('\u{feff}')).to_lowercase()
}

/// Positions of the required fields within a header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    date: usize,
    from: usize,
    subject: usize,
    unique_id: usize,
}

impl FieldSchema {
    /// Match a header row against [`REQUIRED_FIELDS`]
    ///
    /// When two headers normalize to the same name the later one wins.
    pub fn resolve<'h, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'h str>,
    {
        let columns: HashMap<String, usize> = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (normalize_column(name), idx))
            .collect();

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| !columns.contains_key(**field))
            .map(|field| field.to_string())
            .collect();

        if !missing.is_empty() {
            let mut found: Vec<String> = columns.into_keys().collect();
            found.sort();
            return Err(ReportError::MissingFields { missing, found });
        }

        Ok(Self {
            date: columns["date"],
            from: columns["from"],
            subject: columns["subject"],
            unique_id: columns["unique id"],
        })
    }

    /// Build a record from one data row; absent cells read as empty
    pub fn record<S: AsRef<str>>(&self, row: &[S]) -> RawMessageRecord {
        let cell = |idx: usize| {
            row.get(idx)
                .map(|value| value.as_ref().trim().to_string())
                .unwrap_or_default()
        };

        RawMessageRecord {
            date: cell(self.date),
            from_raw: cell(self.from),
            subject: cell(self.subject),
            unique_id: cell(self.unique_id),
        }
    }
}

/// Load raw messages from a `.csv`, `.xlsx` or `.xlsm` file.
///
/// `sheet` picks a worksheet by name. Without it the first worksheet in
/// workbook order is read, which is not necessarily the sheet that was
/// active when the file was saved. It is ignored for CSV input.
///
/// The header is always row 1 of the sheet; a sheet with blank rows above
/// its header fails with [`ReportError::MissingFields`].
pub fn load_messages(path: &Path, sheet: Option<&str>) -> Result<Vec<RawMessageRecord>> {
    if !path.exists() {
        return Err(ReportError::InputNotFound(path.display().to_string()));
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let records = match extension.as_str() {
        "csv" => load_csv(path)?,
        "xlsx" | "xlsm" => load_workbook(path, sheet)?,
        other => {
            let shown = if other.is_empty() {
                String::new()
            } else {
                format!(".{}", other)
            };
            return Err(ReportError::UnsupportedInput(shown));
        }
    };

    info!("Loaded {} rows from {:?}", records.len(), path);
    Ok(records)
}

fn load_csv(path: &Path) -> Result<Vec<RawMessageRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(ReportError::EmptyInput("CSV has no header row".to_string()));
    }

    let schema = FieldSchema::resolve(headers.iter())?;
    debug!("CSV columns resolved: {:?}", schema);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cells: Vec<&str> = row.iter().collect();
        records.push(schema.record(&cells));
    }
    Ok(records)
}

fn load_workbook(path: &Path, sheet: Option<&str>) -> Result<Vec<RawMessageRecord>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_names = workbook.sheet_names();

    let sheet_name = match sheet {
        Some(name) if sheet_names.iter().any(|s| s == name) => name.to_string(),
        Some(name) => {
            return Err(ReportError::WorkbookError(format!(
                "Worksheet '{}' not found. Available: {}",
                name,
                sheet_names.join(", ")
            )))
        }
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ReportError::EmptyInput("Workbook has no worksheets".to_string()))?,
    };

    let range = workbook.worksheet_range(&sheet_name)?;
    debug!(
        "Reading worksheet '{}' ({:?} from {:?})",
        sheet_name,
        range.get_size(),
        range.start()
    );

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let rows = anchor_at_a1(range.start().unwrap_or((0, 0)), rows);
    records_from_rows(rows, "XLSX sheet is empty")
}

/// Re-insert the blank rows and columns calamine trims before `start`
fn anchor_at_a1<I>(start: (u32, u32), rows: I) -> impl Iterator<Item = Vec<String>>
where
    I: Iterator<Item = Vec<String>>,
{
    let (first_row, first_col) = (start.0 as usize, start.1 as usize);
    std::iter::repeat_with(Vec::new)
        .take(first_row)
        .chain(rows.map(move |row| {
            let mut padded = vec![String::new(); first_col];
            padded.extend(row);
            padded
        }))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Treat the first row as the header and the rest as data
fn records_from_rows<I>(mut rows: I, empty_message: &str) -> Result<Vec<RawMessageRecord>>
where
    I: Iterator<Item = Vec<String>>,
{
    let header = rows
        .next()
        .ok_or_else(|| ReportError::EmptyInput(empty_message.to_string()))?;
    let schema = FieldSchema::resolve(header.iter().map(String::as_str))?;

    Ok(rows.map(|row| schema.record(&row)).collect())
}

/// Read a JSON export written by [`crate::export::save_export_json`]
pub fn load_export(path: &Path) -> Result<Vec<ExportRecord>> {
    if !path.exists() {
        return Err(ReportError::InputNotFound(path.display().to_string()));
    }

    let reader = BufReader::new(File::open(path)?);
    let records: Vec<ExportRecord> = serde_json::from_reader(reader)?;

    info!("Loaded {} records from {:?}", records.len(), path);
    Ok(records)
}

//! JSON and CSV sinks for exports and reports

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{AnnotatedRecord, ExportRecord, SenderRanking};

/// Stable name of the most recent export inside an export directory
pub const LATEST_EXPORT_FILE: &str = "gmail_headers.json";

const RANKING_HEADER: [&str; 2] = ["Count", "Email"];
const MESSAGES_HEADER: [&str; 4] = ["Count", "Email", "From", "Subject"];

/// Where [`save_export_json`] wrote its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub timestamped: PathBuf,
    pub latest: PathBuf,
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<stem>[_<label>]_<ts>.<ext>`
pub fn report_file_name(stem: &str, label: &str, ts: &str, ext: &str) -> String {
    if label.is_empty() {
        format!("{}_{}.{}", stem, ts, ext)
    } else {
        format!("{}_{}_{}.{}", stem, label, ts, ext)
    }
}

/// Write a timestamped JSON export and refresh the stable copy beside it
pub fn save_export_json(records: &[ExportRecord], dir: &Path) -> Result<ExportPaths> {
    fs::create_dir_all(dir)?;

    let timestamped = dir.join(report_file_name("gmail_headers", "", &timestamp(), "json"));
    let json = serde_json::to_string_pretty(records)?;
    fs::write(&timestamped, json)?;

    let latest = dir.join(LATEST_EXPORT_FILE);
    fs::copy(&timestamped, &latest)?;

    info!("Saved {} records to {:?}", records.len(), timestamped);
    Ok(ExportPaths { timestamped, latest })
}

/// Header row first, even when there are no rows
fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `Count,Email` rows in ranking order
pub fn write_ranking_csv(ranking: &[SenderRanking], dir: &Path, label: &str) -> Result<PathBuf> {
    let path = dir.join(report_file_name("sender_ranking", label, &timestamp(), "csv"));
    write_csv(&path, &RANKING_HEADER, ranking)?;
    info!("Wrote {} senders to {:?}", ranking.len(), path);
    Ok(path)
}

/// `Count,Email,From,Subject` rows in input order
pub fn write_messages_csv(messages: &[AnnotatedRecord], dir: &Path, label: &str) -> Result<PathBuf> {
    let path = dir.join(report_file_name("messages_with_counts", label, &timestamp(), "csv"));
    write_csv(&path, &MESSAGES_HEADER, messages)?;
    info!("Wrote {} messages to {:?}", messages.len(), path);
    Ok(path)
}

/// Flatten an export to `Date,From,Canonical Email,Subject,Unique ID`
pub fn write_headers_csv(records: &[ExportRecord], path: &Path) -> Result<()> {
    write_csv(path, &ExportRecord::FIELDS, records)?;
    info!("Wrote CSV {:?} ({} rows)", path, records.len());
    Ok(())
}

mod excel;
mod pdf;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use thiserror::Error;

use crate::storage::HistoryEntry;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Unsupported format")]
    UnsupportedFormat(String),
    #[error("History is empty")]
    EmptyHistory,
    #[error("Failed to generate report: {0}")]
    Generation(String),
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Generation(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Excel,
    Pdf,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Excel => "xlsx",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Json => "json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ReportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Json => "application/json",
        }
    }

    /// Name offered to the browser for the download.
    pub fn download_name(self) -> String {
        format!("bear_report.{}", self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excel" | "xlsx" => Ok(ReportFormat::Excel),
            "pdf" => Ok(ReportFormat::Pdf),
            "json" => Ok(ReportFormat::Json),
            _ => Err(ReportError::UnsupportedFormat(s.to_string())),
        }
    }
}

pub struct Report {
    pub format: ReportFormat,
    pub bytes: Vec<u8>,
    /// Copy kept in the report directory.
    pub path: PathBuf,
}

/// Renders history exports and keeps a timestamped copy of each on disk.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generate(
        &self,
        format: ReportFormat,
        entries: &[HistoryEntry],
    ) -> Result<Report, ReportError> {
        if entries.is_empty() {
            return Err(ReportError::EmptyHistory);
        }

        let bytes = render(format, entries)?;

        std::fs::create_dir_all(&self.dir)?;
        let (path, mut file) = self.create_copy(format)?;
        file.write_all(&bytes)?;

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            bytes = bytes.len(),
            "report generated"
        );

        Ok(Report {
            format,
            bytes,
            path,
        })
    }

    /// Opens a new file for the kept copy. Exports within the same second
    /// get a `_N` suffix instead of overwriting each other.
    fn create_copy(&self, format: ReportFormat) -> std::io::Result<(PathBuf, File)> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut attempt = 0u32;
        loop {
            let file_name = if attempt == 0 {
                format!("bear_detection_report_{stamp}.{}", format.extension())
            } else {
                format!("bear_detection_report_{stamp}_{attempt}.{}", format.extension())
            };
            let path = self.dir.join(file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn render(format: ReportFormat, entries: &[HistoryEntry]) -> Result<Vec<u8>, ReportError> {
    match format {
        ReportFormat::Excel => excel::render(entries),
        ReportFormat::Pdf => pdf::render(entries),
        ReportFormat::Json => {
            serde_json::to_vec_pretty(entries).map_err(|e| ReportError::Generation(e.to_string()))
        }
    }
}

/// Earliest and latest entry dates as "dd.mm.yyyy".
fn data_period(entries: &[HistoryEntry]) -> Option<(String, String)> {
    let mut dates = entries
        .iter()
        .filter_map(|e| crate::stats::entry_date(&e.timestamp));
    let first = dates.next()?;
    let (min, max) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
    Some((
        min.format("%d.%m.%Y").to_string(),
        max.format("%d.%m.%Y").to_string(),
    ))
}

/// Mean, max and min confidence of a single entry, zero when it has no
/// detections.
fn entry_confidence(entry: &HistoryEntry) -> (f64, f64, f64) {
    let confidences: Vec<f64> = entry.detections.iter().map(|d| d.confidence).collect();
    if confidences.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let max = confidences.iter().cloned().fold(f64::MIN, f64::max);
    let min = confidences.iter().cloned().fold(f64::MAX, f64::min);
    (mean, max, min)
}

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::Detection;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("entry {id} has a non-finite value in {field}")]
    NonFinite { id: String, field: &'static str },
    #[error("history lock poisoned")]
    Poisoned,
}

/// One completed detection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "original_image")]
    pub original_image_ref: String,
    #[serde(rename = "result_image")]
    pub result_image_ref: String,
    pub detections: Vec<Detection>,
    pub bear_count: usize,
    pub processing_time: f64,
}

impl HistoryEntry {
    /// Creates an entry stamped with a fresh id and the current local time.
    pub fn new(
        original_image_ref: String,
        result_image_ref: String,
        detections: Vec<Detection>,
        processing_time: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            original_image_ref,
            result_image_ref,
            bear_count: detections.len(),
            detections,
            processing_time,
        }
    }

    fn check_finite(&self) -> Result<(), HistoryError> {
        let fail = |field| HistoryError::NonFinite {
            id: self.id.clone(),
            field,
        };
        if !self.processing_time.is_finite() {
            return Err(fail("processing_time"));
        }
        for det in &self.detections {
            if det.bbox.iter().any(|v| !v.is_finite()) {
                return Err(fail("bbox"));
            }
            if !det.confidence.is_finite() {
                return Err(fail("confidence"));
            }
            if !det.area.is_finite() {
                return Err(fail("area"));
            }
            if !det.center_x.is_finite() || !det.center_y.is_finite() {
                return Err(fail("center"));
            }
        }
        Ok(())
    }
}

/// Append-only log of [`HistoryEntry`] persisted as one JSON array.
///
/// Reads never fail on a corrupt document: the file is reset to `[]` and an
/// empty history is returned. Writes go to `<file>.tmp` and are renamed over
/// the canonical file. [`HistoryStore::append`] is serialized within the
/// process; separate processes sharing one file can still lose updates.
pub struct HistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, HistoryError> {
        self.write_lock.lock().map_err(|_| HistoryError::Poisoned)
    }

    pub fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let _guard = self.lock()?;
        self.read_entries()
    }

    pub fn save(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let _guard = self.lock()?;
        self.write_entries(entries)
    }

    pub fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        entry.check_finite()?;
        let _guard = self.lock()?;
        let mut entries = self.read_entries()?;
        entries.push(entry);
        self.write_entries(&entries)
    }

    fn read_entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "history file missing, initializing");
                self.write_entries(&[])?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Vec<HistoryEntry>>(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "history file is corrupt, resetting to empty"
                );
                if let Err(reset_err) = self.write_entries(&[]) {
                    tracing::warn!(error = %reset_err, "failed to reset corrupt history file");
                }
                Ok(Vec::new())
            }
        }
    }

    fn write_entries(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let staged = self.stage(entries)?;
        self.commit(staged)
    }

    /// Writes `entries` to the temporary file and returns its path. The
    /// canonical file is not touched.
    fn stage(&self, entries: &[HistoryEntry]) -> Result<PathBuf, HistoryError> {
        for entry in entries {
            entry.check_finite()?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.temp_path();
        let written = File::create(&tmp_path).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(tmp_path)
    }

    fn commit(&self, tmp_path: PathBuf) -> Result<(), HistoryError> {
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

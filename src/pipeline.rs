use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::annotate::{self, ConfidenceTier};
use crate::detection::{BearDetector, DetectError, Detection};
use crate::storage::{result_file_name, ArtifactStore, HistoryEntry, HistoryError, HistoryStore};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Detection(#[from] DetectError),
    #[error("failed to annotate result image: {0}")]
    Annotation(#[from] opencv::Error),
    #[error("failed to store image: {0}")]
    Storage(#[from] std::io::Error),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("detector lock poisoned")]
    Poisoned,
}

/// Detection as returned to the uploader, without the derived geometry.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub bbox: [f64; 4],
    pub confidence: f64,
    #[serde(rename = "class")]
    pub class_label: String,
    pub class_id: u32,
}

impl From<&Detection> for DetectionSummary {
    fn from(d: &Detection) -> Self {
        Self {
            bbox: d.bbox,
            confidence: d.confidence,
            class_label: d.class_label.clone(),
            class_id: d.class_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub bear_count: usize,
    pub detections: Vec<DetectionSummary>,
    pub result_image: String,
    pub history_id: String,
    pub processing_time: f64,
}

/// Upload -> detection -> annotation -> persistence for one request.
///
/// Artifacts written before a failing step (e.g. the raw upload) are left in
/// place.
pub struct Pipeline {
    detector: Mutex<BearDetector>,
    artifacts: ArtifactStore,
    history: Arc<HistoryStore>,
}

impl Pipeline {
    pub fn new(detector: BearDetector, artifacts: ArtifactStore, history: Arc<HistoryStore>) -> Self {
        Self {
            detector: Mutex::new(detector),
            artifacts,
            history,
        }
    }

    /// Runs the whole sequence. Blocking: call from a blocking thread.
    pub fn process_upload(
        &self,
        file_name: &str,
        data: &[u8],
    ) -> Result<UploadResponse, PipelineError> {
        if file_name.is_empty() {
            return Err(PipelineError::Validation("No selected file".to_string()));
        }
        if data.is_empty() {
            return Err(PipelineError::Validation(
                "Uploaded image is empty".to_string(),
            ));
        }

        let started = Instant::now();
        let upload = self.artifacts.save_upload(file_name, data)?;
        tracing::debug!(path = %upload.path.display(), "upload stored");

        let outcome = {
            let mut detector = self.detector.lock().map_err(|_| PipelineError::Poisoned)?;
            detector.detect_bytes(data)?
        };

        let detections = outcome.detections;
        let mut image = outcome.base_image;
        for detection in &detections {
            tracing::debug!(
                confidence = detection.confidence,
                tier = ConfidenceTier::from_confidence(detection.confidence).as_str(),
                bbox = ?detection.bbox,
                "bear detected"
            );
            annotate::draw_detection(&mut image, detection)?;
        }

        let elapsed = started.elapsed();
        annotate::draw_info_panel(&mut image, &detections, elapsed)?;

        let (result_name, ext) = result_file_name(&upload.file_name);
        let encoded = annotate::encode(&image, &ext)?;
        let result = self.artifacts.save_result(result_name, &encoded)?;

        let processing_time = elapsed.as_secs_f64();
        let entry = HistoryEntry::new(
            upload.reference,
            result.reference.clone(),
            detections,
            processing_time,
        );
        let response = UploadResponse {
            success: true,
            bear_count: entry.bear_count,
            detections: entry.detections.iter().map(DetectionSummary::from).collect(),
            result_image: result.reference,
            history_id: entry.id.clone(),
            processing_time,
        };

        self.history.append(entry)?;

        tracing::info!(
            id = %response.history_id,
            bears = response.bear_count,
            processing_time = format!("{:.3}", processing_time),
            "upload processed"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::detection::testing::{encoded_image, ScriptedModel};
    use crate::detection::RawDetection;
    use tempfile::tempdir;

    fn pipeline(root: &std::path::Path, model: ScriptedModel) -> (Pipeline, Arc<HistoryStore>) {
        let history = Arc::new(HistoryStore::new(root.join("history.json")));
        let detector = BearDetector::from_config(Box::new(model), &DetectionConfig::default());
        let artifacts = ArtifactStore::open(root.join("static")).unwrap();
        (
            Pipeline::new(detector, artifacts, Arc::clone(&history)),
            history,
        )
    }

    fn bears() -> ScriptedModel {
        ScriptedModel::new(vec![
            RawDetection {
                bbox: [10.0, 20.0, 110.0, 220.0],
                confidence: 0.9,
                class_id: 21,
            },
            RawDetection {
                bbox: [300.0, 50.0, 400.0, 150.0],
                confidence: 0.6,
                class_id: 21,
            },
        ])
    }

    #[test]
    fn upload_is_detected_annotated_and_recorded() {
        let dir = tempdir().unwrap();
        let (pipeline, history) = pipeline(dir.path(), bears());

        let response = pipeline
            .process_upload("bear.png", &encoded_image(640, 480))
            .unwrap();
        assert!(response.success);
        assert_eq!(response.bear_count, 2);
        assert!(response.result_image.starts_with("static/results/result_"));
        assert!(response.result_image.ends_with("_bear.png"));

        let result_path = dir.path().join(&response.result_image);
        assert!(result_path.exists());

        let entries = history.load().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, response.history_id);
        assert_eq!(entry.bear_count, 2);
        assert_eq!(entry.detections.len(), 2);
        assert!(entry.original_image_ref.starts_with("static/uploads/"));
        assert!(dir.path().join(&entry.original_image_ref).exists());
        assert_eq!(entry.processing_time, response.processing_time);
        assert!(entry.processing_time >= 0.0);
    }

    #[test]
    fn response_omits_derived_geometry() {
        let dir = tempdir().unwrap();
        let (pipeline, _) = pipeline(dir.path(), bears());
        let response = pipeline
            .process_upload("bear.png", &encoded_image(640, 480))
            .unwrap();

        let json = serde_json::to_value(&response).unwrap();
        let first = &json["detections"][0];
        assert_eq!(first["class"], "bear");
        assert_eq!(first["class_id"], 21);
        assert!(first.get("area").is_none());
        assert!(first.get("center_x").is_none());
    }

    #[test]
    fn zero_bears_is_still_recorded() {
        let dir = tempdir().unwrap();
        let (pipeline, history) = pipeline(dir.path(), ScriptedModel::new(vec![]));
        let response = pipeline
            .process_upload("forest.jpg", &encoded_image(320, 240))
            .unwrap();
        assert_eq!(response.bear_count, 0);
        assert!(response.result_image.ends_with(".jpg"));
        assert_eq!(history.load().unwrap()[0].bear_count, 0);
    }

    #[test]
    fn empty_inputs_are_validation_errors() {
        let dir = tempdir().unwrap();
        let (pipeline, history) = pipeline(dir.path(), bears());

        let err = pipeline.process_upload("", b"abc").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ref m) if m == "No selected file"));
        let err = pipeline.process_upload("bear.png", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn undecodable_upload_fails_without_history_entry() {
        let dir = tempdir().unwrap();
        let (pipeline, history) = pipeline(dir.path(), bears());

        let err = pipeline
            .process_upload("bear.png", b"not really a png")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Detection(DetectError::Decode(_))));
        assert!(history.load().unwrap().is_empty());
        // The raw upload is kept.
        let uploads = std::fs::read_dir(dir.path().join("static/uploads")).unwrap();
        assert_eq!(uploads.count(), 1);
    }
}

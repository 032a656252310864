use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::annotate;
use crate::config::DetectionConfig;

use super::model::{DetectError, Detection, InferenceModel, Thresholds};

/// Which model class counts as a target, and the label stored for it.
#[derive(Debug, Clone)]
pub struct TargetClass {
    pub id: usize,
    pub label: String,
}

pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    /// Image the overlay is drawn onto. A copy of the source when targets
    /// were found, otherwise the model's own view of every raw detection.
    pub base_image: Mat,
}

pub struct BearDetector {
    model: Box<dyn InferenceModel>,
    thresholds: Thresholds,
    target: TargetClass,
}

impl BearDetector {
    pub fn new(model: Box<dyn InferenceModel>, thresholds: Thresholds, target: TargetClass) -> Self {
        Self {
            model,
            thresholds,
            target,
        }
    }

    pub fn from_config(model: Box<dyn InferenceModel>, config: &DetectionConfig) -> Self {
        Self::new(
            model,
            Thresholds {
                confidence: config.confidence_threshold,
                iou: config.iou_threshold,
            },
            TargetClass {
                id: config.target_class_id,
                label: config.target_class_label.clone(),
            },
        )
    }

    pub fn target(&self) -> &TargetClass {
        &self.target
    }

    /// Decodes `data` and runs the model on it.
    pub fn detect_bytes(&mut self, data: &[u8]) -> Result<DetectionOutcome, DetectError> {
        let image = decode_image(data)?;
        self.detect(&image)
    }

    pub fn detect(&mut self, image: &Mat) -> Result<DetectionOutcome, DetectError> {
        if image.empty() {
            return Err(DetectError::Decode("image has no pixels".to_string()));
        }

        let raw = self.model.infer(image, self.thresholds)?;
        let raw_count = raw.len();

        let detections: Vec<Detection> = raw
            .iter()
            .filter(|r| r.class_id == self.target.id)
            .filter_map(|r| {
                let [x1, y1, x2, y2] = r.bbox.map(f64::from);
                if x2 <= x1 || y2 <= y1 {
                    tracing::trace!(bbox = ?r.bbox, "dropping degenerate box");
                    return None;
                }
                Some(Detection::new(
                    [x1, y1, x2, y2],
                    f64::from(r.confidence),
                    r.class_id as u32,
                    self.target.label.clone(),
                ))
            })
            .collect();

        tracing::debug!(
            raw = raw_count,
            targets = detections.len(),
            target = %self.target.label,
            "inference finished"
        );

        let mut base_image = image.try_clone()?;
        if detections.is_empty() && !raw.is_empty() {
            annotate::plot_model_view(&mut base_image, &raw)?;
        }

        Ok(DetectionOutcome {
            detections,
            base_image,
        })
    }
}

/// Decodes an encoded raster image into a 3-channel BGR matrix.
pub fn decode_image(data: &[u8]) -> Result<Mat, DetectError> {
    if data.is_empty() {
        return Err(DetectError::Decode("no image data".to_string()));
    }
    let buf = Vector::<u8>::from_slice(data);
    let image = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)
        .map_err(|e| DetectError::Decode(e.to_string()))?;
    if image.empty() {
        return Err(DetectError::Decode(
            "unrecognised or corrupt image data".to_string(),
        ));
    }
    Ok(image)
}

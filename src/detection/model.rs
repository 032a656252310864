use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("model inference failed: {0}")]
    Inference(String),
}

impl From<opencv::Error> for DetectError {
    fn from(e: opencv::Error) -> Self {
        DetectError::Inference(e.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

/// One box as reported by the model, before any class filtering.
/// Coordinates are `[x1, y1, x2, y2]` in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

impl RawDetection {
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    pub fn iou(&self, other: &RawDetection) -> f32 {
        let x1 = self.bbox[0].max(other.bbox[0]);
        let y1 = self.bbox[1].max(other.bbox[1]);
        let x2 = self.bbox[2].min(other.bbox[2]);
        let y2 = self.bbox[3].min(other.bbox[3]);

        let intersection = if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        };
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Anything that can turn a decoded BGR image into raw detections.
///
/// The ONNX session is the production implementation; it is loaded once at
/// startup and handed to [`super::BearDetector`].
pub trait InferenceModel: Send {
    fn infer(
        &mut self,
        image: &Mat,
        thresholds: Thresholds,
    ) -> Result<Vec<RawDetection>, DetectError>;
}

/// A located target-class instance. `area`, `center_x` and `center_y` are
/// derived from `bbox` and stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f64; 4],
    pub confidence: f64,
    #[serde(rename = "class")]
    pub class_label: String,
    pub class_id: u32,
    pub area: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl Detection {
    pub fn new(bbox: [f64; 4], confidence: f64, class_id: u32, class_label: String) -> Self {
        let [x1, y1, x2, y2] = bbox;
        Self {
            bbox,
            confidence,
            class_label,
            class_id,
            area: ((x2 - x1) * (y2 - y1)).max(0.0),
            center_x: (x1 + x2) / 2.0,
            center_y: (y1 + y2) / 2.0,
        }
    }
}

/// Class-aware non-maximum suppression. The result is ordered by confidence,
/// highest first.
pub fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bbox: [f32; 4], confidence: f32, class_id: usize) -> RawDetection {
        RawDetection {
            bbox,
            confidence,
            class_id,
        }
    }

    #[test]
    fn derived_geometry_follows_bbox() {
        let d = Detection::new([10.0, 20.0, 110.0, 70.0], 0.9, 21, "bear".into());
        assert_eq!(d.area, 100.0 * 50.0);
        assert_eq!(d.center_x, 60.0);
        assert_eq!(d.center_y, 45.0);
    }

    #[test]
    fn detection_uses_wire_field_names() {
        let d = Detection::new([0.0, 0.0, 2.0, 2.0], 0.5, 21, "bear".into());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["class"], "bear");
        assert_eq!(json["class_id"], 21);
        assert_eq!(json["area"], 4.0);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = raw([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        let b = raw([20.0, 20.0, 30.0, 30.0], 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let dets = vec![
            raw([0.0, 0.0, 100.0, 100.0], 0.6, 21),
            raw([2.0, 2.0, 102.0, 102.0], 0.9, 21),
            raw([1.0, 1.0, 101.0, 101.0], 0.7, 0),
            raw([300.0, 300.0, 400.0, 400.0], 0.4, 21),
        ];
        let kept = nms(dets, 0.45);
        let summary: Vec<(usize, f32)> = kept.iter().map(|d| (d.class_id, d.confidence)).collect();
        assert_eq!(summary, vec![(21, 0.9), (0, 0.7), (21, 0.4)]);
    }
}

use ndarray::{Array4, ArrayViewD};
use opencv::core::Mat;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::config::DetectionConfig;

use super::model::{nms, DetectError, InferenceModel, RawDetection, Thresholds};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_DETECTIONS: usize = 300;
const PAD_VALUE: f64 = 114.0;

/// Geometry of the letterbox transform, used to map model boxes back onto
/// the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    input_size: f32,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: f32,
    orig_h: f32,
}

impl Letterbox {
    fn new(orig_w: f32, orig_h: f32, input_size: u32) -> Self {
        let input_size = input_size as f32;
        let scale = (input_size / orig_w).min(input_size / orig_h);
        let new_w = (orig_w * scale).round();
        let new_h = (orig_h * scale).round();
        Self {
            input_size,
            scale,
            pad_x: ((input_size - new_w) / 2.0).floor(),
            pad_y: ((input_size - new_h) / 2.0).floor(),
            orig_w,
            orig_h,
        }
    }

    /// Box given as center/size in model input pixels -> clamped xyxy in
    /// source pixels.
    fn to_source(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
        let x1 = ((cx - w / 2.0) - self.pad_x) / self.scale;
        let y1 = ((cy - h / 2.0) - self.pad_y) / self.scale;
        let x2 = ((cx + w / 2.0) - self.pad_x) / self.scale;
        let y2 = ((cy + h / 2.0) - self.pad_y) / self.scale;
        [
            x1.clamp(0.0, self.orig_w),
            y1.clamp(0.0, self.orig_h),
            x2.clamp(0.0, self.orig_w),
            y2.clamp(0.0, self.orig_h),
        ]
    }
}

pub struct OnnxModel {
    session: Session,
    input_size: u32,
}

impl OnnxModel {
    pub fn new(model_path: &str, input_size: u32, intra_threads: usize) -> Result<Self, BoxError> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path)?
        } else {
            builder.commit_from_file(model_path)?
        };

        Ok(Self {
            session,
            input_size,
        })
    }

    /// Loads the configured model, trying `fallback_model_path` if the
    /// primary one cannot be opened.
    pub fn load(config: &DetectionConfig) -> Result<Self, BoxError> {
        match Self::new(&config.model_path, config.input_size, config.intra_threads) {
            Ok(model) => {
                tracing::info!(model = %config.model_path, "detection model loaded");
                Ok(model)
            }
            Err(e) => {
                let Some(fallback) = &config.fallback_model_path else {
                    return Err(e);
                };
                tracing::warn!(
                    model = %config.model_path,
                    fallback = %fallback,
                    error = %e,
                    "failed to load model, trying fallback"
                );
                let model = Self::new(fallback, config.input_size, config.intra_threads)?;
                tracing::info!(model = %fallback, "fallback detection model loaded");
                Ok(model)
            }
        }
    }

    fn run(&mut self, frame: &Mat, thresholds: Thresholds) -> Result<Vec<RawDetection>, BoxError> {
        use opencv::prelude::*;

        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::new(cols as f32, rows as f32, self.input_size);
        let input_tensor = self.preprocess(frame, &letterbox)?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;

        let candidates = if let (Some(logits_val), Some(boxes_val)) =
            (outputs.get("logits"), outputs.get("pred_boxes"))
        {
            let logits = logits_val.try_extract_array::<f32>()?.to_owned();
            let boxes = boxes_val.try_extract_array::<f32>()?.to_owned();
            decode_yolo26(
                &logits.view(),
                &boxes.view(),
                thresholds.confidence,
                &letterbox,
            )?
        } else if let Some(output) = outputs.get("output0") {
            let output = output.try_extract_array::<f32>()?.to_owned();
            decode_yolov8(&output.view(), thresholds.confidence, &letterbox)?
        } else {
            return Err("Unsupported model format: expected YOLO26 ('logits', 'pred_boxes') \
                 or YOLOv8 ('output0') outputs"
                .into());
        };
        drop(outputs);

        let mut detections = nms(candidates, thresholds.iou);
        detections.truncate(MAX_DETECTIONS);
        Ok(detections)
    }

    fn preprocess(&self, frame: &Mat, letterbox: &Letterbox) -> Result<Array4<f32>, BoxError> {
        use opencv::core::{Size, BORDER_CONSTANT};
        use opencv::imgproc;
        use opencv::prelude::*;

        let size = self.input_size as i32;
        let new_w = (letterbox.orig_w * letterbox.scale).round() as i32;
        let new_h = (letterbox.orig_h * letterbox.scale).round() as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = letterbox.pad_x as i32;
        let pad_y = letterbox.pad_y as i32;

        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            size - new_h - pad_y,
            pad_x,
            size - new_w - pad_x,
            BORDER_CONSTANT,
            opencv::core::Scalar::new(PAD_VALUE, PAD_VALUE, PAD_VALUE, 0.0),
        )?;

        // The model expects RGB; OpenCV decodes to BGR.
        let mut rgb = Mat::default();
        imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb.data_bytes()?;
        let side = self.input_size as usize;
        if data.len() < side * side * 3 {
            return Err("Frame data too small".into());
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for y in 0..side {
            for x in 0..side {
                let idx = (y * side + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }
}

impl InferenceModel for OnnxModel {
    fn infer(
        &mut self,
        image: &Mat,
        thresholds: Thresholds,
    ) -> Result<Vec<RawDetection>, DetectError> {
        self.run(image, thresholds)
            .map_err(|e| DetectError::Inference(e.to_string()))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// End-to-end head: `logits` [1, Q, C] and `pred_boxes` [1, Q, 4] with boxes
/// as normalized (cx, cy, w, h).
fn decode_yolo26(
    logits: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<RawDetection>, BoxError> {
    let logits_shape = logits.shape();
    if logits_shape.len() < 2 || boxes.shape().len() < 2 {
        return Ok(Vec::new());
    }

    let (num_queries, num_classes) = if logits_shape.len() == 3 {
        (logits_shape[1], logits_shape[2])
    } else {
        (logits_shape[0], logits_shape[1])
    };

    let logits_flat = logits.as_slice().ok_or("Cannot get logits slice")?;
    let boxes_flat = boxes.as_slice().ok_or("Cannot get boxes slice")?;
    if logits_flat.len() < num_queries * num_classes || boxes_flat.len() < num_queries * 4 {
        return Err("Model output shorter than its declared shape".into());
    }

    let input_size = letterbox.input_size;
    let mut detections = Vec::new();

    for i in 0..num_queries {
        let mut max_score = 0.0f32;
        let mut max_class = 0usize;
        for j in 0..num_classes {
            let score = sigmoid(logits_flat[i * num_classes + j]);
            if score > max_score {
                max_score = score;
                max_class = j;
            }
        }

        if max_score < confidence_threshold {
            continue;
        }

        let cx = boxes_flat[i * 4] * input_size;
        let cy = boxes_flat[i * 4 + 1] * input_size;
        let w = boxes_flat[i * 4 + 2] * input_size;
        let h = boxes_flat[i * 4 + 3] * input_size;

        detections.push(RawDetection {
            bbox: letterbox.to_source(cx, cy, w, h),
            confidence: max_score,
            class_id: max_class,
        });
    }

    Ok(detections)
}

/// Classic anchor-free head: `output0` [1, 4 + C, N], (cx, cy, w, h) in input
/// pixels followed by per-class scores.
fn decode_yolov8(
    output: &ArrayViewD<f32>,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<RawDetection>, BoxError> {
    let shape = output.shape();
    if shape.len() != 3 {
        return Err(format!("Expected 3D output, got {}D", shape.len()).into());
    }
    if shape[0] == 0 || shape[1] <= 4 {
        return Ok(Vec::new());
    }

    let num_classes = shape[1] - 4;
    let num_boxes = shape[2];
    let mut detections = Vec::new();

    for i in 0..num_boxes {
        let mut max_score = 0.0f32;
        let mut max_class = 0usize;
        for c in 0..num_classes {
            let score = output[[0, 4 + c, i]];
            if score > max_score {
                max_score = score;
                max_class = c;
            }
        }

        if max_score < confidence_threshold {
            continue;
        }

        let bbox = letterbox.to_source(
            output[[0, 0, i]],
            output[[0, 1, i]],
            output[[0, 2, i]],
            output[[0, 3, i]],
        );
        detections.push(RawDetection {
            bbox,
            confidence: max_score,
            class_id: max_class,
        });
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    #[test]
    fn letterbox_pads_the_short_side() {
        let lb = Letterbox::new(1280.0, 640.0, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
    }

    #[test]
    fn letterbox_maps_boxes_back_and_clamps() {
        let lb = Letterbox::new(1280.0, 640.0, 640);
        // Box centred at (100, 260) in model space, 40x40.
        let bbox = lb.to_source(100.0, 260.0, 40.0, 40.0);
        assert_eq!(bbox, [160.0, 160.0, 240.0, 240.0]);

        let clamped = lb.to_source(5.0, 170.0, 40.0, 40.0);
        assert_eq!(clamped[0], 0.0);
        assert_eq!(clamped[1], 0.0);
    }

    #[test]
    fn yolo26_decoding_keeps_best_class_above_threshold() {
        let lb = Letterbox::new(640.0, 640.0, 640);
        // Two queries, three classes.
        let logits = Array3::from_shape_vec((1, 2, 3), vec![-5.0, 4.0, -5.0, -5.0, -5.0, -3.0])
            .unwrap()
            .into_dyn();
        let boxes = Array3::from_shape_vec(
            (1, 2, 4),
            vec![0.5, 0.5, 0.25, 0.25, 0.1, 0.1, 0.1, 0.1],
        )
        .unwrap()
        .into_dyn();

        let dets = decode_yolo26(&logits.view(), &boxes.view(), 0.25, &lb).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert!(dets[0].confidence > 0.98);
        assert_eq!(dets[0].bbox, [240.0, 240.0, 400.0, 400.0]);
    }

    #[test]
    fn yolov8_decoding_reads_channel_major_layout() {
        let lb = Letterbox::new(640.0, 640.0, 640);
        // 4 box rows + 2 class rows, 2 candidates.
        let mut output = ndarray::ArrayD::<f32>::zeros(IxDyn(&[1, 6, 2]));
        for (row, value) in [100.0, 100.0, 50.0, 20.0, 0.1, 0.8].iter().enumerate() {
            output[[0, row, 0]] = *value;
        }
        output[[0, 4, 1]] = 0.1;
        output[[0, 5, 1]] = 0.2;

        let dets = decode_yolov8(&output.view(), 0.25, &lb).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].bbox, [75.0, 90.0, 125.0, 110.0]);
    }

    #[test]
    fn yolov8_empty_batch_yields_nothing() {
        let lb = Letterbox::new(640.0, 640.0, 640);
        let output = ndarray::ArrayD::<f32>::zeros(IxDyn(&[0, 6, 2]));
        assert!(decode_yolov8(&output.view(), 0.25, &lb).unwrap().is_empty());
    }
}

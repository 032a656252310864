mod adapter;
pub mod classes;
mod model;
mod onnx;

pub use adapter::BearDetector;
pub use model::{DetectError, Detection, RawDetection};
pub use onnx::OnnxModel;

#[cfg(test)]
pub mod testing {
    use std::time::Duration;

    use opencv::core::{Mat, Scalar, Vector, CV_8UC3};
    use opencv::imgcodecs;

    use super::model::{DetectError, InferenceModel, RawDetection, Thresholds};

    /// Returns a fixed set of raw detections regardless of the input.
    pub struct ScriptedModel {
        script: Result<Vec<RawDetection>, String>,
        delay: Duration,
        panics: bool,
    }

    impl ScriptedModel {
        pub fn new(detections: Vec<RawDetection>) -> Self {
            Self {
                script: Ok(detections),
                delay: Duration::ZERO,
                panics: false,
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                script: Err(message.to_string()),
                delay: Duration::ZERO,
                panics: false,
            }
        }

        /// Sleeps for `delay` before answering.
        pub fn slow(detections: Vec<RawDetection>, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(detections)
            }
        }

        pub fn panicking() -> Self {
            Self {
                panics: true,
                ..Self::new(Vec::new())
            }
        }
    }

    impl InferenceModel for ScriptedModel {
        fn infer(
            &mut self,
            _image: &Mat,
            _thresholds: Thresholds,
        ) -> Result<Vec<RawDetection>, DetectError> {
            std::thread::sleep(self.delay);
            if self.panics {
                panic!("scripted model panic");
            }
            self.script.clone().map_err(DetectError::Inference)
        }
    }

    /// A flat gray PNG of the given size.
    pub fn encoded_image(width: i32, height: i32) -> Vec<u8> {
        let image =
            Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(127.0)).unwrap();
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".png", &image, &mut buf, &Vector::<i32>::new()).unwrap();
        buf.to_vec()
    }
}

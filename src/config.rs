use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_http_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_detection_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_detection_timeout")]
    pub detection_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            max_upload_bytes: default_max_upload_bytes(),
            detection_timeout_secs: default_detection_timeout(),
        }
    }
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_history_file() -> PathBuf {
    PathBuf::from("history.json")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("static/reports")
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            history_file: default_history_file(),
            report_dir: default_report_dir(),
        }
    }
}

fn default_model_path() -> String {
    "yolo26s.onnx".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_target_class_id() -> usize {
    21
}

fn default_target_class_label() -> String {
    "bear".to_string()
}

fn default_input_size() -> u32 {
    640
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default)]
    pub fallback_model_path: Option<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_target_class_id")]
    pub target_class_id: usize,
    #[serde(default = "default_target_class_label")]
    pub target_class_label: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            fallback_model_path: None,
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            target_class_id: default_target_class_id(),
            target_class_label: default_target_class_label(),
            input_size: default_input_size(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let det = &self.detection;
        for (name, value) in [
            ("confidence_threshold", det.confidence_threshold),
            ("iou_threshold", det.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "detection.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if det.input_size == 0 {
            return Err(ConfigError::Invalid(
                "detection.input_size must be positive".to_string(),
            ));
        }
        if det.target_class_label.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "detection.target_class_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

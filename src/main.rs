use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

mod annotate;
mod api;
mod config;
mod detection;
mod pipeline;
mod report;
mod stats;
mod storage;

use api::AppState;
use config::Config;
use detection::{BearDetector, OnnxModel};
use pipeline::Pipeline;
use report::ReportWriter;
use storage::{ArtifactStore, HistoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bearwatch=debug".parse()?))
        .init();

    let config = Config::load()?;

    let artifacts = ArtifactStore::open(&config.storage.static_dir)?;
    tracing::info!(dir = %artifacts.root().display(), "artifact storage ready");

    let history = Arc::new(HistoryStore::new(&config.storage.history_file));
    let existing = history.load()?;
    tracing::info!(
        path = %history.path().display(),
        entries = existing.len(),
        "history loaded"
    );

    let model = OnnxModel::load(&config.detection).map_err(|e| e as Box<dyn std::error::Error>)?;
    let detector = BearDetector::from_config(Box::new(model), &config.detection);
    tracing::info!(
        class_id = detector.target().id,
        label = %detector.target().label,
        confidence = config.detection.confidence_threshold,
        "detector ready"
    );

    let reports = ReportWriter::new(&config.storage.report_dir);
    tracing::info!(dir = %reports.dir().display(), "reports directory");

    let state = AppState {
        pipeline: Arc::new(Pipeline::new(detector, artifacts, Arc::clone(&history))),
        history,
        reports,
        static_dir: config.storage.static_dir.clone(),
        detection_timeout: Duration::from_secs(config.http.detection_timeout_secs),
        max_upload_bytes: config.http.max_upload_bytes,
    };

    api::start_server(state, config.http.port).await?;

    tracing::info!("shutdown complete");
    Ok(())
}

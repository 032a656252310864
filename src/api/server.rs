use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use rust_embed::Embed;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::pipeline::{Pipeline, PipelineError, UploadResponse};
use crate::report::{ReportFormat, ReportWriter};
use crate::stats::{self, QuickStats, SummaryStats};
use crate::storage::{HistoryEntry, HistoryStore};

use super::ApiError;

const UPLOAD_FIELD: &str = "image";
const DEFAULT_REPORT_FORMAT: &str = "excel";

#[derive(Embed)]
#[folder = "src/assets/"]
struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub history: Arc<HistoryStore>,
    pub reports: ReportWriter,
    pub static_dir: PathBuf,
    pub detection_timeout: Duration,
    pub max_upload_bytes: usize,
}

#[derive(Deserialize)]
struct ReportQuery {
    format: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.static_dir);
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(asset_handler))
        .route("/upload", post(upload_handler).layer(body_limit))
        .route("/history", get(history_handler))
        .route("/generate-report", get(report_handler))
        .route("/stats", get(stats_handler))
        .route("/quick-stats", get(quick_stats_handler))
        .nest_service("/static", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn asset_handler(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::bad_request("No image uploaded"))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        upload = Some((file_name, data));
        break;
    }
    let (file_name, data) = upload.ok_or_else(|| ApiError::bad_request("No image uploaded"))?;

    tracing::debug!(file = %file_name, bytes = data.len(), "upload received");

    let pipeline = Arc::clone(&state.pipeline);
    let mut task = tokio::task::spawn_blocking(move || pipeline.process_upload(&file_name, &data));

    match tokio::time::timeout(state.detection_timeout, &mut task).await {
        Ok(Ok(result)) => Ok(Json(result?)),
        Ok(Err(e)) => Err(ApiError::internal(format!("detection task failed: {e}"))),
        Err(_) => {
            tokio::spawn(report_late_upload(task));
            Err(ApiError::internal("Detection timed out"))
        }
    }
}

/// Inference cannot be interrupted, so a timed-out upload keeps running and
/// may still be recorded in history under an id the client never saw.
async fn report_late_upload(task: JoinHandle<Result<UploadResponse, PipelineError>>) {
    match task.await {
        Ok(Ok(response)) => tracing::warn!(
            id = %response.history_id,
            bears = response.bear_count,
            "upload finished after its request timed out"
        ),
        Ok(Err(e)) => tracing::warn!(error = %e, "timed-out upload failed"),
        Err(e) => tracing::warn!(error = %e, "timed-out upload task failed"),
    }
}

async fn load_history(history: &Arc<HistoryStore>) -> Result<Vec<HistoryEntry>, ApiError> {
    let history = Arc::clone(history);
    tokio::task::spawn_blocking(move || history.load())
        .await
        .map_err(|e| ApiError::internal(format!("history task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn history_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(load_history(&state.history).await?))
}

async fn report_handler(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format: ReportFormat = query
        .format
        .as_deref()
        .unwrap_or(DEFAULT_REPORT_FORMAT)
        .parse()?;

    let entries = load_history(&state.history).await?;
    let reports = state.reports.clone();
    let report = tokio::task::spawn_blocking(move || reports.generate(format, &entries))
        .await
        .map_err(|e| ApiError::internal(format!("report task failed: {e}")))??;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        report.format.download_name()
    );
    Ok((
        [
            (header::CONTENT_TYPE, report.format.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.bytes,
    )
        .into_response())
}

async fn stats_handler(State(state): State<AppState>) -> Result<Json<SummaryStats>, ApiError> {
    let entries = load_history(&state.history).await?;
    Ok(Json(stats::summarize(&entries)))
}

async fn quick_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<QuickStats>, ApiError> {
    let entries = load_history(&state.history).await?;
    Ok(Json(stats::quick_stats(&entries, Local::now().date_naive())))
}

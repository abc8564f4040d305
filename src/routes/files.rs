//! File transfer routes
//!
//! Endpoints:
//! - POST /api/v1/files?filename=NAME - Upload a raw body, chunked in the background
//! - GET /api/v1/files - List tracked files
//! - GET /api/v1/files/:file_id/status - Poll upload progress
//! - GET /api/v1/files/:file_id/download - Stream a completed file
//! - DELETE /api/v1/files/:file_id - Remove a finished transfer
//! - GET /api/v1/stats - Aggregate numbers

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::transfer::{stage_body, DeleteReport, FileRecord, StatusReport, StoreStats, TransferError};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_file).get(list_files))
        .route("/:file_id", delete(delete_file))
        .route("/:file_id/status", get(get_status))
        .route("/:file_id/download", get(download_file))
        // Bodies are streamed to disk; size is enforced by MAX_FILE_SIZE_BYTES
        .layer(DefaultBodyLimit::disable())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: Uuid,
}

/// POST /api/v1/files?filename=NAME
///
/// The raw request body is the file. Returns as soon as the upload is
/// registered; progress is available from the status endpoint.
async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Result<(StatusCode, Json<UploadResponse>), TransferError> {
    let filename = query
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TransferError::InvalidRequest("filename query parameter is required".to_string()))?;

    let transfer = &state.config().transfer;
    let source = stage_body(&transfer.temp_dir, body.into_data_stream(), transfer.max_file_size).await?;

    let file_id = state.transfers().initiate(filename, source).await?;

    Ok((StatusCode::ACCEPTED, Json(UploadResponse { file_id })))
}

/// GET /api/v1/files
async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, TransferError> {
    Ok(Json(state.transfers().list_files().await?))
}

/// GET /api/v1/files/:file_id/status
async fn get_status(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<StatusReport>, TransferError> {
    let file_id = parse_file_id(&file_id)?;
    Ok(Json(state.transfers().status(file_id).await?))
}

/// GET /api/v1/files/:file_id/download
///
/// Streams chunks in order. A pull or integrity failure cuts the body short
/// of Content-Length, which clients must treat as a failed download.
async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, TransferError> {
    let file_id = parse_file_id(&file_id)?;

    let snapshot = state.transfers().prepare_download(file_id).await?;
    let total_size = snapshot.total_size;
    let disposition = content_disposition(&snapshot.filename);

    let stream = state.transfers().stream_download(snapshot)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, total_size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::ACCEPT_RANGES, "none")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| TransferError::Internal(e.to_string()))
}

/// DELETE /api/v1/files/:file_id
async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteReport>, TransferError> {
    let file_id = parse_file_id(&file_id)?;
    Ok(Json(state.transfers().delete(file_id).await?))
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, TransferError> {
    Ok(Json(state.transfers().stats().await?))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_file_id(value: &str) -> Result<Uuid, TransferError> {
    Uuid::parse_str(value).map_err(|_| TransferError::InvalidRequest(format!("Invalid file id: {}", value)))
}

/// Attachment header with an ASCII fallback and the exact UTF-8 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

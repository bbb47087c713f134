use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::BytesMut;
use tokio_util::io::ReaderStream;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CurrentUser, FileResponse, RenameFileRequest};
use crate::transform::{TransformOp, TransformState};
use crate::AppState;

/// List the caller's files
/// GET /api/v1/files
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<FileResponse>>>> {
    let files = state.files.list_records(&current_user.id).await?;
    let files = files.into_iter().map(FileResponse::from).collect();
    Ok(Json(ApiResponse::success(files)))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = state.files.get_record(&id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// Upload a file
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let limit = state.config.storage.max_upload_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .to_string()
            });

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read file chunk: {}", e))
        })? {
            if data.len() + chunk.len() > limit {
                return Err(AppError::PayloadTooLarge(format!(
                    "Upload exceeds {} bytes",
                    limit
                )));
            }
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(
            "Upload of {} ({} bytes) by {} <{}>",
            file_name,
            data.len(),
            current_user.id,
            current_user.email.as_deref().unwrap_or("-")
        );

        let file = state
            .files
            .create_record(&current_user.id, &file_name, &content_type, data.freeze())
            .await?;
        return Ok(Json(ApiResponse::success(file.into())));
    }

    Err(AppError::BadRequest("No file provided".to_string()))
}

/// Download the stored payload as an attachment
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    stream_payload(&state, &current_user, &id, "attachment").await
}

/// Serve the stored payload inline
/// GET /api/v1/files/:id/preview
pub async fn preview_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    stream_payload(&state, &current_user, &id, "inline").await
}

async fn stream_payload(
    state: &AppState,
    current_user: &CurrentUser,
    id: &str,
    disposition: &str,
) -> Result<Response> {
    let (file, reader) = state.files.get_payload(id, &current_user.id).await?;

    // Transformed payloads are served as stored, not as the original type
    let content_type = match file.get_state()? {
        TransformState::Raw => file.mime_type.clone(),
        _ => "application/octet-stream".to_string(),
    };

    let fallback_name = file.display_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&file.display_name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "{}; filename=\"{}\"; filename*=UTF-8''{}",
                disposition, fallback_name, encoded_name
            ),
        )
        .header("X-Transform-State", file.state.as_str())
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Rename a file
/// PATCH /api/v1/files/:id
pub async fn rename_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<RenameFileRequest>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = state
        .files
        .rename_record(&id, &current_user.id, &req.name)
        .await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// Delete a file and its payload
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.files.delete_record(&id, &current_user.id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

async fn transform(
    state: AppState,
    current_user: CurrentUser,
    id: String,
    op: TransformOp,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = state
        .files
        .apply_transform(&id, &current_user.id, op)
        .await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// POST /api/v1/files/:id/compress
pub async fn compress_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    transform(state, current_user, id, TransformOp::Compress).await
}

/// POST /api/v1/files/:id/decompress
pub async fn decompress_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    transform(state, current_user, id, TransformOp::Decompress).await
}

/// POST /api/v1/files/:id/encrypt
pub async fn encrypt_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    transform(state, current_user, id, TransformOp::Encrypt).await
}

/// POST /api/v1/files/:id/decrypt
pub async fn decrypt_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    transform(state, current_user, id, TransformOp::Decrypt).await
}

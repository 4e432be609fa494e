#![allow(clippy::unused_async)]
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures::Stream;
use futures_util::StreamExt;
use kernel::{CleanupResult, DeleteResult, Envelope, StoredFile, UploadStats};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::AuthUser;
use crate::config::Config;
use crate::domain::{Storage, Upload};
use crate::error::UploadError;
use crate::file_reply::FileReply;
use crate::AppState;

const SINGLE_FIELD: &str = "file";
const MULTIPLE_FIELD: &str = "files";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CleanupParams {
    /// Files older than this many days are removed. Defaults to the configured value
    pub days: Option<u32>,
}

/// Uploads one file from multipart field `file`.
#[utoipa::path(
    post,
    path = "/api/upload/single",
    tag = "upload",
    responses(
        (status = 201, description = "File stored", body = Envelope<StoredFile>),
        (status = 400, description = "No file, wrong field or disallowed type", body = Envelope<String>),
        (status = 401, description = "Missing or invalid token", body = Envelope<String>),
        (status = 413, description = "File exceeds the size limit", body = Envelope<String>),
    ),
    security(("bearer" = [])),
)]
pub async fn upload_single(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadError> {
    let mut uploads = read_uploads(&mut multipart, SINGLE_FIELD, 1, &state.config).await?;
    let upload = uploads.pop().ok_or(UploadError::NoFile)?;

    tracing::info!(user = %user.id, file = %upload.original_name, "upload single");
    let stored = state.storage.store(upload).await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok_with_message("File uploaded successfully", stored)),
    ))
}

/// Uploads several files from multipart field `files`.
#[utoipa::path(
    post,
    path = "/api/upload/multiple",
    tag = "upload",
    responses(
        (status = 201, description = "Files stored", body = Envelope<Vec<StoredFile>>),
        (status = 400, description = "No files, too many files, wrong field or disallowed type", body = Envelope<String>),
        (status = 401, description = "Missing or invalid token", body = Envelope<String>),
        (status = 413, description = "A file exceeds the size limit", body = Envelope<String>),
    ),
    security(("bearer" = [])),
)]
pub async fn upload_multiple(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadError> {
    let max_files = state.config.max_files;
    let uploads = read_uploads(&mut multipart, MULTIPLE_FIELD, max_files, &state.config).await?;

    tracing::info!(user = %user.id, count = uploads.len(), "upload multiple");
    let stored = state.storage.store_many(uploads).await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok_with_message("Files uploaded successfully", stored)),
    ))
}

/// Downloads a stored file as an attachment.
#[utoipa::path(
    get,
    path = "/api/upload/file/{filename}",
    tag = "upload",
    responses(
        (status = 200, response = FileReply),
        (status = 400, description = "Invalid file name", body = Envelope<String>),
        (status = 404, description = "File not found", body = Envelope<String>)
    ),
    params(
        ("filename" = String, Path, description = "Stored file name")
    ),
    security(("bearer" = [])),
)]
pub async fn get_file(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<FileReply, UploadError> {
    let (info, file) = state.storage.open(&filename).await?;
    tracing::info!(user = %user.id, file = %filename, size = info.size, "serve file");
    Ok(FileReply::new(file, info))
}

/// Deletes a stored file.
#[utoipa::path(
    delete,
    path = "/api/upload/file/{filename}",
    tag = "upload",
    responses(
        (status = 200, description = "File deleted", body = Envelope<DeleteResult>),
        (status = 400, description = "Invalid file name", body = Envelope<String>),
        (status = 404, description = "File not found", body = Envelope<String>),
        (status = 500, description = "Filesystem refused the delete", body = Envelope<String>)
    ),
    params(
        ("filename" = String, Path, description = "Stored file name")
    ),
    security(("bearer" = [])),
)]
pub async fn delete_file(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, UploadError> {
    state.storage.delete_file(&filename).await?;
    tracing::info!(user = %user.id, file = %filename, "delete file");
    Ok(Json(Envelope::ok_with_message(
        "File deleted successfully",
        DeleteResult { filename },
    )))
}

/// Gets stored file metadata.
#[utoipa::path(
    get,
    path = "/api/upload/info/{filename}",
    tag = "upload",
    responses(
        (status = 200, description = "File metadata", body = Envelope<StoredFile>),
        (status = 400, description = "Invalid file name", body = Envelope<String>),
        (status = 404, description = "File not found", body = Envelope<String>)
    ),
    params(
        ("filename" = String, Path, description = "Stored file name")
    ),
    security(("bearer" = [])),
)]
pub async fn get_file_info(
    Path(filename): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, UploadError> {
    let info = state.storage.file_info(&filename).await?;
    Ok(Json(Envelope::ok(info)))
}

/// Aggregate statistics of the uploads directory. Admin only.
#[utoipa::path(
    get,
    path = "/api/upload/stats",
    tag = "admin",
    responses(
        (status = 200, description = "Storage statistics", body = Envelope<UploadStats>),
        (status = 403, description = "Caller is not an admin", body = Envelope<String>)
    ),
    security(("bearer" = [])),
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, UploadError> {
    let start = Instant::now();
    let stats = state.storage.stats().await?;
    tracing::info!(
        files = stats.total_files,
        bytes = stats.total_size,
        "stats scanned in {:?}",
        start.elapsed()
    );
    Ok(Json(Envelope::ok(stats)))
}

/// Deletes files older than `days`. Admin only.
#[utoipa::path(
    delete,
    path = "/api/upload/cleanup",
    tag = "admin",
    params(CleanupParams),
    responses(
        (status = 200, description = "Sweep finished", body = Envelope<CleanupResult>),
        (status = 400, description = "Invalid days value", body = Envelope<String>),
        (status = 403, description = "Caller is not an admin", body = Envelope<String>)
    ),
    security(("bearer" = [])),
)]
pub async fn cleanup(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> Result<impl IntoResponse, UploadError> {
    let Query(params) = params.map_err(|e| UploadError::InvalidQuery(e.body_text()))?;
    let days = params.days.unwrap_or(state.config.cleanup_days);

    tracing::info!(user = %user.id, days, "cleanup requested");
    let result = state.storage.cleanup(days).await?;

    Ok(Json(Envelope::ok_with_message(
        format!("Cleanup completed. Deleted {} files", result.deleted_count),
        result,
    )))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "service",
    responses(
        (status = 200, description = "Service is up", body = Envelope<String>),
    ),
)]
pub async fn health() -> impl IntoResponse {
    Json(Envelope::ok_with_message(
        "Upload service is running",
        env!("CARGO_PKG_VERSION").to_owned(),
    ))
}

/// Collects file parts named `field_name`, enforcing count, type and size
/// limits before anything touches the disk.
async fn read_uploads(
    multipart: &mut Multipart,
    field_name: &str,
    max_files: usize,
    config: &Config,
) -> Result<Vec<Upload>, UploadError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        // plain form values carry no file
        let Some(original_name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        let name = field.name().unwrap_or_default().to_owned();
        if name != field_name {
            return Err(UploadError::UnexpectedField(name));
        }
        if uploads.len() >= max_files {
            return Err(UploadError::TooManyFiles(max_files));
        }
        if !config.is_extension_allowed(&original_name) {
            return Err(UploadError::UnsupportedFileType(original_name));
        }

        let mimetype = field.content_type().map(ToOwned::to_owned);
        let data = read_limited(field, config.max_file_size).await?;
        tracing::debug!("part {original_name} read: {} bytes", data.len());

        uploads.push(Upload {
            original_name,
            mimetype,
            data,
        });
    }
    Ok(uploads)
}

async fn read_limited<S, E>(stream: S, limit: u64) -> Result<Vec<u8>, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<UploadError>,
{
    futures::pin_mut!(stream);
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(UploadError::FileTooLarge(limit));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

fn multipart_error(e: MultipartError) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::PayloadTooLarge
    } else {
        UploadError::Multipart(e.body_text())
    }
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        multipart_error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        let items: Vec<Result<Bytes, io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn read_limited_accepts_exact_limit() {
        // Arrange
        let stream = chunks(&[b"ab", b"cd"]);

        // Act
        let data = read_limited(stream, 4).await.unwrap();

        // Assert
        assert_eq!(data, b"abcd");
    }

    #[tokio::test]
    async fn read_limited_rejects_oversized() {
        // Arrange
        let stream = chunks(&[b"ab", b"cde"]);

        // Act
        let result = read_limited(stream, 4).await;

        // Assert
        assert!(matches!(result, Err(UploadError::FileTooLarge(4))));
    }
}

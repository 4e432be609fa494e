use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use kernel::Envelope;
use thiserror::Error;

/// Failures surfaced by the upload API.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("Unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("Too many files. At most {0} allowed")]
    TooManyFiles(usize),

    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("File too large. Limit is {0} bytes")]
    FileTooLarge(u64),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Malformed multipart request: {0}")]
    Multipart(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("File not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl UploadError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::NoFile
            | UploadError::InvalidFileName(_)
            | UploadError::UnexpectedField(_)
            | UploadError::TooManyFiles(_)
            | UploadError::UnsupportedFileType(_)
            | UploadError::Multipart(_)
            | UploadError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            UploadError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            UploadError::Forbidden(_) => StatusCode::FORBIDDEN,
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::FileTooLarge(_) | UploadError::PayloadTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Storage(e.to_string())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        (status, Json(Envelope::<()>::failure(self.to_string()))).into_response()
    }
}

/// Rewrites rejections produced below the handlers (body limit) into the
/// JSON envelope every other reply uses.
pub async fn envelope_rejections(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return UploadError::PayloadTooLarge.into_response();
    }
    response
}

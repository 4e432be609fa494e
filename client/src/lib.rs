use std::path::{Path, PathBuf};

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use futures::StreamExt;
use kernel::{CleanupResult, DeleteResult, Envelope, StoredFile, UploadStats};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use resource::Resource;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub mod resource;

const TABLE_WIDTH: u16 = 120;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid service URI '{0}'")]
    InvalidUri(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server replied {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected reply: {0}")]
    Decode(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Typed access to the upload API of a running server.
pub struct UploadClient {
    base: Resource,
    token: Option<String>,
    http: Client,
}

impl UploadClient {
    pub fn new(uri: &str, token: Option<String>) -> Result<Self, ClientError> {
        let base = Resource::new(uri).ok_or_else(|| ClientError::InvalidUri(uri.to_owned()))?;
        Ok(Self {
            base,
            token,
            http: Client::new(),
        })
    }

    fn resource(&self, path: &str) -> Resource {
        let mut resource = self.base.clone();
        resource.append_path(path);
        resource
    }

    fn file_resource(&self, path: &str, file_name: &str) -> Resource {
        let mut resource = self.resource(path);
        resource.append_file_name(file_name);
        resource
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn upload_single(&self, file: &Path) -> Result<StoredFile, ClientError> {
        let form = Form::new().part("file", file_part(file).await?);
        let request = self
            .http
            .post(self.resource("api/upload/single").to_string())
            .multipart(form);
        unwrap_envelope(self.authorized(request).send().await?).await
    }

    pub async fn upload_multiple(&self, files: &[PathBuf]) -> Result<Vec<StoredFile>, ClientError> {
        let mut form = Form::new();
        for file in files {
            form = form.part("files", file_part(file).await?);
        }
        let request = self
            .http
            .post(self.resource("api/upload/multiple").to_string())
            .multipart(form);
        unwrap_envelope(self.authorized(request).send().await?).await
    }

    /// Streams a stored file into `target` and returns the number of bytes written.
    pub async fn download(&self, file_name: &str, target: &Path) -> Result<u64, ClientError> {
        let request = self
            .http
            .get(self.file_resource("api/upload/file", file_name).to_string());
        let response = self.authorized(request).send().await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let io_error = |source| ClientError::Io {
            path: target.display().to_string(),
            source,
        };
        let mut out = File::create(target).await.map_err(io_error)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        out.flush().await.map_err(io_error)?;
        Ok(written)
    }

    pub async fn info(&self, file_name: &str) -> Result<StoredFile, ClientError> {
        let request = self
            .http
            .get(self.file_resource("api/upload/info", file_name).to_string());
        unwrap_envelope(self.authorized(request).send().await?).await
    }

    pub async fn delete(&self, file_name: &str) -> Result<DeleteResult, ClientError> {
        let request = self
            .http
            .delete(self.file_resource("api/upload/file", file_name).to_string());
        unwrap_envelope(self.authorized(request).send().await?).await
    }

    pub async fn stats(&self) -> Result<UploadStats, ClientError> {
        let request = self.http.get(self.resource("api/upload/stats").to_string());
        unwrap_envelope(self.authorized(request).send().await?).await
    }

    pub async fn cleanup(&self, days: Option<u32>) -> Result<CleanupResult, ClientError> {
        let mut resource = self.resource("api/upload/cleanup");
        if let Some(days) = days {
            resource.append_query("days", &days.to_string());
        }
        let request = self.http.delete(resource.to_string());
        unwrap_envelope(self.authorized(request).send().await?).await
    }
}

async fn file_part(path: &Path) -> Result<Part, ClientError> {
    let io_error = |source| ClientError::Io {
        path: path.display().to_string(),
        source,
    };
    let f = File::open(path).await.map_err(io_error)?;
    let len = f.metadata().await.map_err(io_error)?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stream = reqwest::Body::wrap_stream(ReaderStream::new(f));
    Ok(Part::stream_with_length(stream, len).file_name(file_name))
}

async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    decode_envelope(status, &body)
}

async fn error_from(response: Response) -> ClientError {
    let status = response.status().as_u16();
    match response.text().await {
        Ok(body) => match decode_envelope::<serde_json::Value>(status, &body) {
            Err(e) => e,
            Ok(_) => ClientError::Api {
                status,
                message: body,
            },
        },
        Err(e) => e.into(),
    }
}

/// Unwraps `{success, message?, data?}`. Bodies that are not envelopes
/// (body limit rejections, proxies) become [`ClientError::Api`] with the raw text.
fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ClientError> {
    let is_success = (200..300).contains(&status);
    match serde_json::from_str::<Envelope<T>>(body) {
        Ok(Envelope {
            success: true,
            data: Some(data),
            ..
        }) if is_success => Ok(data),
        Ok(envelope) => Err(ClientError::Api {
            status,
            message: envelope
                .message
                .unwrap_or_else(|| "reply without data".to_owned()),
        }),
        Err(e) if is_success => Err(ClientError::Decode(e.to_string())),
        Err(_) => Err(ClientError::Api {
            status,
            message: body.to_owned(),
        }),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(TABLE_WIDTH)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

#[must_use]
pub fn files_table(files: &[StoredFile]) -> Table {
    let mut table = new_table(vec!["File", "Original name", "Size", "Modified", "URL"]);
    for f in files {
        let modified = f
            .modified_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&f.filename),
            Cell::new(&f.original_name),
            Cell::new(f.size),
            Cell::new(modified),
            Cell::new(&f.url),
        ]);
    }
    table
}

#[must_use]
pub fn stats_table(stats: &UploadStats) -> Table {
    let mut table = new_table(vec!["Extension", "Files"]);
    for (extension, count) in &stats.file_types {
        let extension = if extension.is_empty() {
            "(none)"
        } else {
            extension.as_str()
        };
        table.add_row(vec![Cell::new(extension), Cell::new(count)]);
    }
    table.add_row(vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(format!("{} ({} bytes)", stats.total_files, stats.total_size)),
    ]);
    table
}

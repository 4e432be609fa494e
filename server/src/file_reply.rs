use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use kernel::StoredFile;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::{
    openapi::{
        self, content, schema::Type, KnownFormat, ObjectBuilder, RefOr, ResponseBuilder,
        SchemaFormat,
    },
    ToResponse,
};

/// Streams a stored file back as a download attachment.
pub struct FileReply {
    file: File,
    info: StoredFile,
}

impl FileReply {
    #[must_use]
    pub fn new(file: File, info: StoredFile) -> Self {
        Self { file, info }
    }

    fn disposition(&self) -> String {
        let name = name_from_path(&self.info.original_name).replace(['"', '\r', '\n'], "_");
        format!(r#"attachment; filename="{name}""#)
    }
}

fn name_from_path(path: &str) -> &str {
    if let Some(ix) = path.rfind(['\\', '/']) {
        &path[ix + 1..]
    } else {
        path
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let attachment = self.disposition();
        let len = self.info.size.to_string();
        let mut res = Body::from_stream(ReaderStream::new(self.file)).into_response();
        let headers = res.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        if let Ok(val) = HeaderValue::from_str(&attachment) {
            headers.insert(header::CONTENT_DISPOSITION, val);
        }
        if let Ok(val) = HeaderValue::from_str(&len) {
            headers.insert(header::CONTENT_LENGTH, val);
        }

        res
    }
}

impl ToResponse<'static> for FileReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Binary)))
            .build();
        let content = content::Content::new(Some(object));
        (
            "FileReply",
            ResponseBuilder::new()
                .description("Stored file content as an attachment")
                .content("application/octet-stream", content)
                .build()
                .into(),
        )
    }
}

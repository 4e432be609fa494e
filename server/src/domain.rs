use std::fmt::{Debug, Display};
use std::future::Future;

use kernel::{CleanupResult, StoredFile, UploadStats};

/// File received from a multipart part, ready to be persisted.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub mimetype: Option<String>,
    pub data: Vec<u8>,
}

pub trait Storage {
    type Err: Debug + Display;
    /// Readable handle returned by [`Storage::open`].
    type Reader;

    fn store(&self, upload: Upload) -> impl Future<Output = Result<StoredFile, Self::Err>> + Send;

    fn store_many(
        &self,
        uploads: Vec<Upload>,
    ) -> impl Future<Output = Result<Vec<StoredFile>, Self::Err>> + Send;

    fn open(
        &self,
        filename: &str,
    ) -> impl Future<Output = Result<(StoredFile, Self::Reader), Self::Err>> + Send;

    fn file_info(&self, filename: &str)
        -> impl Future<Output = Result<StoredFile, Self::Err>> + Send;

    fn delete_file(&self, filename: &str) -> impl Future<Output = Result<(), Self::Err>> + Send;

    fn stats(&self) -> impl Future<Output = Result<UploadStats, Self::Err>> + Send;

    fn cleanup(
        &self,
        max_age_days: u32,
    ) -> impl Future<Output = Result<CleanupResult, Self::Err>> + Send;
}

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use client::{files_table, stats_table, ClientError, UploadClient};

/// Where and as whom to call the service.
pub struct Service {
    pub uri: String,
    pub token: Option<String>,
}

impl Service {
    fn connect(&self) -> Result<UploadClient, ClientError> {
        UploadClient::new(&self.uri, self.token.clone())
    }
}

fn finish(result: Result<String, ClientError>) -> ExitCode {
    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn upload(service: &Service, files: &[PathBuf]) -> ExitCode {
    finish(try_upload(service, files).await)
}

async fn try_upload(service: &Service, files: &[PathBuf]) -> Result<String, ClientError> {
    let client = service.connect()?;
    let stored = match files {
        [single] => vec![client.upload_single(single).await?],
        many => client.upload_multiple(many).await?,
    };
    Ok(files_table(&stored).to_string())
}

pub async fn download(service: &Service, file_name: &str, target: &Path) -> ExitCode {
    finish(try_download(service, file_name, target).await)
}

async fn try_download(
    service: &Service,
    file_name: &str,
    target: &Path,
) -> Result<String, ClientError> {
    let written = service.connect()?.download(file_name, target).await?;
    Ok(format!("{written} bytes written to {}", target.display()))
}

pub async fn info(service: &Service, file_name: &str) -> ExitCode {
    let result = match service.connect() {
        Ok(client) => client.info(file_name).await,
        Err(e) => Err(e),
    };
    finish(result.map(|stored| files_table(&[stored]).to_string()))
}

pub async fn delete(service: &Service, file_name: &str) -> ExitCode {
    let result = match service.connect() {
        Ok(client) => client.delete(file_name).await,
        Err(e) => Err(e),
    };
    finish(result.map(|deleted| format!("{} deleted", deleted.filename)))
}

pub async fn stats(service: &Service) -> ExitCode {
    let result = match service.connect() {
        Ok(client) => client.stats().await,
        Err(e) => Err(e),
    };
    finish(result.map(|stats| stats_table(&stats).to_string()))
}

pub async fn cleanup(service: &Service, days: Option<u32>) -> ExitCode {
    let result = match service.connect() {
        Ok(client) => client.cleanup(days).await,
        Err(e) => Err(e),
    };
    finish(result.map(|cleaned| format!("Deleted {} files", cleaned.deleted_count)))
}

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use kernel::{file_url, CleanupResult, StoredFile, UploadStats};
use rand::Rng;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::{Storage, Upload};
use crate::error::UploadError;

const MAX_NAME_LEN: usize = 100;
const MAX_NAME_ATTEMPTS: usize = 8;
const FALLBACK_NAME: &str = "file";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Flat directory of uploaded files. The directory listing is the only
/// source of truth, there is no manifest.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the storage root if it is missing.
    pub async fn ensure_root(&self) -> Result<(), UploadError> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            UploadError::Storage(format!(
                "Failed to create uploads directory {}: {e}",
                self.root.display()
            ))
        })
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf, UploadError> {
        validate_file_name(filename)?;
        Ok(self.root.join(filename))
    }

    async fn absolute(&self, path: &Path) -> PathBuf {
        match fs::canonicalize(&self.root).await {
            Ok(root) => path
                .file_name()
                .map_or_else(|| root.clone(), |name| root.join(name)),
            Err(_) => path.to_path_buf(),
        }
    }

    async fn describe(&self, filename: &str, path: &Path) -> Result<StoredFile, UploadError> {
        let meta = match fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(UploadError::NotFound(filename.to_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NotFound(filename.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(StoredFile {
            filename: filename.to_owned(),
            original_name: original_name_of(filename).to_owned(),
            size: meta.len(),
            mimetype: None,
            path: self.absolute(path).await.display().to_string(),
            url: file_url(filename),
            hash: None,
            created_time: meta.created().ok().map(DateTime::<Utc>::from),
            modified_time: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

impl Storage for LocalStorage {
    type Err = UploadError;
    type Reader = File;

    async fn store(&self, upload: Upload) -> Result<StoredFile, UploadError> {
        self.ensure_root().await?;
        let start = Instant::now();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = generate_file_name(&upload.original_name);
            let path = self.root.join(&filename);
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(UploadError::Storage(format!(
                        "Failed to create file {}: {e}",
                        path.display()
                    )))
                }
            };

            file.write_all(&upload.data).await.map_err(|e| {
                UploadError::Storage(format!("Failed to write file {}: {e}", path.display()))
            })?;
            file.flush().await?;

            let hash = blake3::hash(&upload.data).to_hex().to_string();
            let size = upload.data.len() as u64;

            tracing::info!(
                file = %filename,
                original = %upload.original_name,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "file stored"
            );

            return Ok(StoredFile {
                original_name: upload.original_name,
                size,
                mimetype: upload.mimetype,
                path: self.absolute(&path).await.display().to_string(),
                url: file_url(&filename),
                hash: Some(hash),
                created_time: None,
                modified_time: None,
                filename,
            });
        }

        Err(UploadError::Storage(format!(
            "Failed to allocate a unique name for '{}'",
            upload.original_name
        )))
    }

    async fn store_many(&self, uploads: Vec<Upload>) -> Result<Vec<StoredFile>, UploadError> {
        if uploads.is_empty() {
            return Err(UploadError::NoFile);
        }
        let mut stored = Vec::with_capacity(uploads.len());
        for upload in uploads {
            stored.push(self.store(upload).await?);
        }
        Ok(stored)
    }

    async fn open(&self, filename: &str) -> Result<(StoredFile, File), UploadError> {
        let path = self.resolve(filename)?;
        let info = self.describe(filename, &path).await?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NotFound(filename.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok((info, file))
    }

    async fn file_info(&self, filename: &str) -> Result<StoredFile, UploadError> {
        let path = self.resolve(filename)?;
        self.describe(filename, &path).await
    }

    async fn delete_file(&self, filename: &str) -> Result<(), UploadError> {
        let path = self.resolve(filename)?;
        match fs::symlink_metadata(&path).await {
            Ok(m) if !m.is_dir() => {}
            Ok(_) => return Err(UploadError::NotFound(filename.to_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::NotFound(filename.to_owned()))
            }
            Err(e) => return Err(e.into()),
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file = %filename, "file deleted");
                Ok(())
            }
            // lost a race with another delete or the cleanup sweep
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(UploadError::NotFound(filename.to_owned()))
            }
            Err(e) => Err(UploadError::Storage(format!(
                "Failed to delete file {filename}: {e}"
            ))),
        }
    }

    async fn stats(&self) -> Result<UploadStats, UploadError> {
        let mut stats = UploadStats::default();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("skip {}: {e}", entry.path().display());
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            stats.total_files += 1;
            stats.total_size += meta.len();
            *stats
                .file_types
                .entry(extension_key(&entry.file_name()))
                .or_insert(0) += 1;
        }

        Ok(stats)
    }

    async fn cleanup(&self, max_age_days: u32) -> Result<CleanupResult, UploadError> {
        let cutoff = cutoff_time(SystemTime::now(), max_age_days);
        let mut result = CleanupResult::default();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        let mut expired = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) if modified < cutoff => expired.push(entry.path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("cannot stat {}: {e}", entry.path().display()),
            }
        }

        for path in expired {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    result.deleted_count += 1;
                    tracing::debug!("expired file removed: {}", path.display());
                }
                Err(e) => tracing::warn!("failed to remove {}: {e}", path.display()),
            }
        }

        tracing::info!(
            max_age_days,
            deleted = result.deleted_count,
            "cleanup completed"
        );
        Ok(result)
    }
}

/// Accepts only a single normal path component so that a name can never
/// resolve outside the storage root.
pub fn validate_file_name(filename: &str) -> Result<(), UploadError> {
    let invalid = || UploadError::InvalidFileName(filename.to_owned());
    if filename.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == OsStr::new(filename) => Ok(()),
        _ => Err(invalid()),
    }
}

/// `<unix millis>-<9 random digits>-<sanitized original name>`
fn generate_file_name(original_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{millis}-{suffix:09}-{}", sanitize_file_name(original_name))
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned: String = cleaned
        .trim_start_matches('.')
        .chars()
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_owned()
    } else {
        cleaned
    }
}

/// Recovers the client name embedded by [`generate_file_name`].
#[must_use]
pub fn original_name_of(filename: &str) -> &str {
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let mut parts = filename.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(millis), Some(suffix), Some(rest))
            if is_digits(millis) && is_digits(suffix) && !rest.is_empty() =>
        {
            rest
        }
        _ => filename,
    }
}

fn extension_key(file_name: &OsStr) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn cutoff_time(now: SystemTime, max_age_days: u32) -> SystemTime {
    let age = Duration::from_secs(u64::from(max_age_days) * SECONDS_PER_DAY);
    match now.checked_sub(age) {
        Some(cutoff) if cutoff > UNIX_EPOCH => cutoff,
        _ => UNIX_EPOCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::AsyncReadExt;

    fn upload(name: &str, size: usize) -> Upload {
        Upload {
            original_name: name.to_owned(),
            mimetype: Some("text/plain".to_owned()),
            data: vec![b'x'; size],
        }
    }

    fn age(path: &Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY);
        let file = std::fs::File::options()
            .read(true)
            .open(path)
            .unwrap();
        file.set_modified(when).unwrap();
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0)
    }

    #[rstest]
    #[case("file.txt", true)]
    #[case("1700000000000-000000001-report.pdf", true)]
    #[case(".hidden", true)]
    #[case("", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("../../etc/passwd", false)]
    #[case("dir/file.txt", false)]
    #[case("dir\\file.txt", false)]
    #[case("/etc/passwd", false)]
    #[case("file.txt/", false)]
    #[case("nul\0byte", false)]
    #[trace]
    fn file_name_validation(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_file_name(name).is_ok(), valid);
    }

    #[rstest]
    #[case("report.pdf", "report.pdf")]
    #[case("C:\\Users\\me\\report.pdf", "report.pdf")]
    #[case("dir/sub/photo.png", "photo.png")]
    #[case("my report (1).pdf", "my_report__1_.pdf")]
    #[case("..secret", "secret")]
    #[case("", "file")]
    #[case("...", "file")]
    #[case("дом.txt", "___.txt")]
    #[trace]
    fn sanitize(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(sanitize_file_name(name), expected);
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let name = "a".repeat(300);
        assert_eq!(sanitize_file_name(&name).len(), MAX_NAME_LEN);
    }

    #[rstest]
    #[case("1700000000000-123456789-report.pdf", "report.pdf")]
    #[case("1700000000000-123456789-my-report.pdf", "my-report.pdf")]
    #[case("report.pdf", "report.pdf")]
    #[case("abc-123-report.pdf", "abc-123-report.pdf")]
    #[case("1700000000000-123456789-", "1700000000000-123456789-")]
    #[trace]
    fn original_name_recovery(#[case] filename: &str, #[case] expected: &str) {
        assert_eq!(original_name_of(filename), expected);
    }

    #[test]
    fn generated_name_embeds_original() {
        let name = generate_file_name("Quarterly report.pdf");
        assert!(name.ends_with("-Quarterly_report.pdf"));
        assert_eq!(original_name_of(&name), "Quarterly_report.pdf");
        assert!(validate_file_name(&name).is_ok());
    }

    #[rstest]
    #[case("a.TXT", ".txt")]
    #[case("archive.tar.gz", ".gz")]
    #[case("README", "")]
    #[case(".bashrc", "")]
    fn extension_keys(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(extension_key(OsStr::new(name)), expected);
    }

    #[test]
    fn cutoff_saturates_at_epoch() {
        let now = SystemTime::now();
        assert_eq!(cutoff_time(UNIX_EPOCH, 30), UNIX_EPOCH);
        assert_eq!(cutoff_time(now, u32::MAX), UNIX_EPOCH);
        assert_eq!(cutoff_time(now, 0), now);
        assert_eq!(
            cutoff_time(now, 30),
            now - Duration::from_secs(30 * SECONDS_PER_DAY)
        );
    }

    #[tokio::test]
    async fn store_then_open_returns_same_bytes() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let data = b"printer on fire".to_vec();

        // Act
        let stored = storage
            .store(Upload {
                original_name: "ticket.txt".to_owned(),
                mimetype: Some("text/plain".to_owned()),
                data: data.clone(),
            })
            .await
            .unwrap();
        let (info, mut file) = storage.open(&stored.filename).await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();

        // Assert
        assert_eq!(stored.size, data.len() as u64);
        assert_eq!(stored.original_name, "ticket.txt");
        assert_eq!(stored.url, format!("/uploads/{}", stored.filename));
        assert_eq!(stored.hash, Some(blake3::hash(&data).to_hex().to_string()));
        assert!(Path::new(&stored.path).is_absolute());
        assert_eq!(info.size, stored.size);
        assert_eq!(info.original_name, "ticket.txt");
        assert_eq!(content, data);
    }

    #[tokio::test]
    async fn store_creates_missing_root() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("uploads");
        let storage = LocalStorage::new(&root);

        // Act
        storage.store(upload("a.txt", 1)).await.unwrap();

        // Assert
        assert_eq!(entries(&root), 1);
    }

    #[tokio::test]
    async fn same_original_name_never_overwrites() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        // Act
        let first = storage.store(upload("same.txt", 1)).await.unwrap();
        let second = storage.store(upload("same.txt", 2)).await.unwrap();

        // Assert
        assert_ne!(first.filename, second.filename);
        assert_eq!(entries(dir.path()), 2);
    }

    #[tokio::test]
    async fn store_many_rejects_empty_list() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        // Act
        let result = storage.store_many(Vec::new()).await;

        // Assert
        assert!(matches!(result, Err(UploadError::NoFile)));
    }

    #[tokio::test]
    async fn file_info_reports_timestamps() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let stored = storage.store(upload("log.txt", 42)).await.unwrap();

        // Act
        let info = storage.file_info(&stored.filename).await.unwrap();

        // Assert
        assert_eq!(info.size, 42);
        assert!(info.modified_time.is_some());
        assert_eq!(info.url, stored.url);
        assert!(info.mimetype.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.store(upload("keep.txt", 3)).await.unwrap();

        // Act
        let open = storage.open("nope.txt").await;
        let info = storage.file_info("nope.txt").await;
        let delete = storage.delete_file("nope.txt").await;

        // Assert
        assert!(matches!(open, Err(UploadError::NotFound(_))));
        assert!(matches!(info, Err(UploadError::NotFound(_))));
        assert!(matches!(delete, Err(UploadError::NotFound(_))));
        assert_eq!(entries(dir.path()), 1);
    }

    #[tokio::test]
    async fn traversal_never_leaves_root() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("outside.txt"), b"secret").unwrap();
        let storage = LocalStorage::new(&root);

        // Act
        let open = storage.open("../outside.txt").await;
        let passwd = storage.open("../../etc/passwd").await;
        let delete = storage.delete_file("../outside.txt").await;

        // Assert
        assert!(matches!(open, Err(UploadError::InvalidFileName(_))));
        assert!(matches!(passwd, Err(UploadError::InvalidFileName(_))));
        assert!(matches!(delete, Err(UploadError::InvalidFileName(_))));
        assert!(dir.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn delete_removes_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let stored = storage.store(upload("a.txt", 5)).await.unwrap();

        // Act
        storage.delete_file(&stored.filename).await.unwrap();
        let again = storage.delete_file(&stored.filename).await;

        // Assert
        assert_eq!(entries(dir.path()), 0);
        assert!(matches!(again, Err(UploadError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_refused_by_filesystem_is_storage_error() {
        use std::os::unix::fs::PermissionsExt;

        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let stored = storage.store(upload("a.txt", 5)).await.unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();
        // root ignores directory permissions
        let privileged = std::fs::write(dir.path().join("canary"), b"").is_ok();

        // Act
        let result = storage.delete_file(&stored.filename).await;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        // Assert
        if privileged {
            assert!(result.is_ok());
            return;
        }
        assert!(matches!(result, Err(UploadError::Storage(_))));
        assert!(dir.path().join(&stored.filename).exists());
    }

    #[tokio::test]
    async fn stats_of_missing_root_are_empty() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("never-created"));

        // Act
        let stats = storage.stats().await.unwrap();
        let cleanup = storage.cleanup(0).await.unwrap();

        // Assert
        assert_eq!(stats, UploadStats::default());
        assert_eq!(cleanup.deleted_count, 0);
    }

    #[tokio::test]
    async fn stats_sum_sizes_and_types() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.store(upload("a.txt", 100)).await.unwrap();
        storage.store(upload("b.TXT", 200)).await.unwrap();
        storage.store(upload("c.pdf", 300)).await.unwrap();
        storage.store(upload("Makefile", 7)).await.unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        // Act
        let stats = storage.stats().await.unwrap();

        // Assert
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.total_size, 607);
        assert_eq!(stats.file_types.get(".txt"), Some(&2));
        assert_eq!(stats.file_types.get(".pdf"), Some(&1));
        assert_eq!(stats.file_types.get(""), Some(&1));
        assert_eq!(stats.file_types.values().sum::<u64>(), stats.total_files);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_files() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let old = storage.store(upload("old.txt", 10)).await.unwrap();
        let fresh = storage.store(upload("fresh.txt", 10)).await.unwrap();
        let recent = storage.store(upload("recent.txt", 10)).await.unwrap();
        age(Path::new(&old.path), 45);
        age(Path::new(&recent.path), 29);

        // Act
        let result = storage.cleanup(30).await.unwrap();

        // Assert
        assert_eq!(result.deleted_count, 1);
        assert!(!Path::new(&old.path).exists());
        assert!(Path::new(&fresh.path).exists());
        assert!(Path::new(&recent.path).exists());
    }

    #[tokio::test]
    async fn cleanup_continues_after_failed_removal() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let first = storage.store(upload("first.txt", 1)).await.unwrap();
        let second = storage.store(upload("second.txt", 1)).await.unwrap();
        // remove_file fails on a directory, the sweep must carry on
        let stray = dir.path().join("0-stray");
        std::fs::create_dir(&stray).unwrap();
        age(&stray, 90);
        age(Path::new(&first.path), 90);
        age(Path::new(&second.path), 90);

        // Act
        let result = storage.cleanup(30).await.unwrap();

        // Assert
        assert_eq!(result.deleted_count, 2);
        assert!(stray.exists());
        assert!(!Path::new(&first.path).exists());
        assert!(!Path::new(&second.path).exists());
    }

    #[tokio::test]
    async fn zero_day_cleanup_empties_store() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        for (name, size) in [("a.txt", 100), ("b.txt", 200), ("c.txt", 300)] {
            storage.store(upload(name, size)).await.unwrap();
        }
        let before = storage.stats().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        let result = storage.cleanup(0).await.unwrap();
        let after = storage.stats().await.unwrap();

        // Assert
        assert_eq!(before.total_files, 3);
        assert_eq!(before.total_size, 600);
        assert_eq!(result.deleted_count, 3);
        assert_eq!(after, UploadStats::default());
    }
}

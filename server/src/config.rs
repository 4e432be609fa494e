use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_UPLOADS_DIR: &str = "./uploads";
const DEFAULT_MAX_FILES: usize = 10;
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_CLEANUP_DAYS: u32 = 30;
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "pdf", "doc", "docx", "xls", "xlsx", "txt", "csv", "zip",
    "log",
];

/// Allows any extension when present in the allow list.
pub const ANY_EXTENSION: &str = "*";

/// Runtime settings of the upload service.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub jwt_secret: String,
    pub max_files: usize,
    pub max_file_size: u64,
    /// Lower-cased extensions without the dot
    pub allowed_extensions: Vec<String>,
    pub cleanup_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            uploads_dir: PathBuf::from(DEFAULT_UPLOADS_DIR),
            jwt_secret: String::new(),
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| (*e).to_owned())
                .collect(),
            cleanup_days: DEFAULT_CLEANUP_DAYS,
        }
    }
}

impl Config {
    /// Reads configuration from `QUICKDESK_*` environment variables.
    /// Unset or malformed values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let jwt_secret = env::var("QUICKDESK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() {
            tracing::warn!("QUICKDESK_JWT_SECRET is not set, every authenticated call will be rejected");
        }
        let allowed_extensions = env::var("QUICKDESK_ALLOWED_EXTENSIONS")
            .map(|v| parse_extensions(&v))
            .unwrap_or(defaults.allowed_extensions);

        Self {
            port: try_load("QUICKDESK_PORT", defaults.port),
            uploads_dir: env::var("QUICKDESK_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            jwt_secret,
            max_files: try_load("QUICKDESK_MAX_FILES", defaults.max_files),
            max_file_size: try_load("QUICKDESK_MAX_FILE_SIZE", defaults.max_file_size),
            allowed_extensions,
            cleanup_days: try_load("QUICKDESK_CLEANUP_DAYS", defaults.cleanup_days),
        }
    }

    /// Checks a client supplied file name against the extension allow list.
    #[must_use]
    pub fn is_extension_allowed(&self, file_name: &str) -> bool {
        if self.allowed_extensions.iter().any(|e| e == ANY_EXTENSION) {
            return true;
        }
        let Some(extension) = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
        else {
            return false;
        };
        let extension = extension.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| *e == extension)
    }

    /// Upper bound for a whole multipart request body.
    #[must_use]
    pub fn body_limit(&self) -> usize {
        let files = u64::try_from(self.max_files).unwrap_or(u64::MAX);
        // room for part headers and boundaries
        let limit = self
            .max_file_size
            .saturating_mul(files)
            .saturating_add(1024 * 1024);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|e| {
            tracing::warn!("Invalid {key} value '{value}': {e}. Using default: {default}");
            default
        }),
        Err(_) => {
            tracing::debug!("{key} not set, using default: {default}");
            default
        }
    }
}

fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

pub mod bugreport;
pub mod client;
pub mod server;
pub mod token;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the upload server";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment for bug reports";

pub const UPLOAD_SUBCOMMAND: &str = "upload";
pub const UPLOAD_DESCRIPTION: &str = "Upload one or more files";

pub const DOWNLOAD_SUBCOMMAND: &str = "download";
pub const DOWNLOAD_DESCRIPTION: &str = "Download a stored file";

pub const INFO_SUBCOMMAND: &str = "info";
pub const INFO_DESCRIPTION: &str = "Show metadata of a stored file";

pub const DELETE_SUBCOMMAND: &str = "delete";
pub const DELETE_DESCRIPTION: &str = "Delete a stored file";

pub const STATS_SUBCOMMAND: &str = "stats";
pub const STATS_DESCRIPTION: &str = "Show storage statistics (admin)";

pub const CLEANUP_SUBCOMMAND: &str = "cleanup";
pub const CLEANUP_DESCRIPTION: &str = "Delete files older than the given number of days (admin)";

pub const TOKEN_SUBCOMMAND: &str = "token";
pub const TOKEN_DESCRIPTION: &str = "Issue an access token signed with QUICKDESK_JWT_SECRET";

pub const DEFAULT_URI: &str = "http://localhost:5000";

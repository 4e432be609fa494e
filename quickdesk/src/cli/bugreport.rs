use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "RUST_LOG",
            "QUICKDESK_PORT",
            "QUICKDESK_UPLOADS_DIR",
            "QUICKDESK_MAX_FILES",
            "QUICKDESK_MAX_FILE_SIZE",
            "QUICKDESK_ALLOWED_EXTENSIONS",
            "QUICKDESK_CLEANUP_DAYS",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}

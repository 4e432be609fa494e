use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgMatches;
use server::config::Config;

pub async fn run(matches: &ArgMatches) -> ExitCode {
    server::init_tracing();

    let mut config = Config::from_env();
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("dir") {
        config.uploads_dir.clone_from(dir);
    }

    match server::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

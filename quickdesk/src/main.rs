use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, crate_name, value_parser, ArgMatches, Command};
use cli::client::Service;
use kernel::Role;

mod cli;

const DEFAULT_TOKEN_TTL_HOURS: &str = "24";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = build_cli().get_matches();

    match cli.subcommand() {
        Some((cli::VERSION_SUBCOMMAND, m)) => {
            cli::version::run(m.get_flag("json"));
            ExitCode::SUCCESS
        }
        Some((cli::BUGREPORT_SUBCOMMAND, _)) => {
            cli::bugreport::run();
            ExitCode::SUCCESS
        }
        Some((cli::SERVER_SUBCOMMAND, m)) => cli::server::run(m).await,
        Some((cli::TOKEN_SUBCOMMAND, m)) => {
            let subject = m.get_one::<String>("subject").map_or("", String::as_str);
            let role = m
                .get_one::<String>("role")
                .and_then(|r| r.parse::<Role>().ok())
                .unwrap_or(Role::User);
            let ttl = m.get_one::<u64>("ttl").copied().unwrap_or_default();
            cli::token::run(subject, role, ttl)
        }
        Some((cli::UPLOAD_SUBCOMMAND, m)) => {
            let files: Vec<PathBuf> = m
                .get_many::<PathBuf>("files")
                .map(|f| f.cloned().collect())
                .unwrap_or_default();
            cli::client::upload(&service(m), &files).await
        }
        Some((cli::DOWNLOAD_SUBCOMMAND, m)) => {
            let file_name = file_name(m);
            let target = m
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(file_name));
            cli::client::download(&service(m), file_name, &target).await
        }
        Some((cli::INFO_SUBCOMMAND, m)) => cli::client::info(&service(m), file_name(m)).await,
        Some((cli::DELETE_SUBCOMMAND, m)) => cli::client::delete(&service(m), file_name(m)).await,
        Some((cli::STATS_SUBCOMMAND, m)) => cli::client::stats(&service(m)).await,
        Some((cli::CLEANUP_SUBCOMMAND, m)) => {
            cli::client::cleanup(&service(m), m.get_one::<u32>("days").copied()).await
        }
        _ => ExitCode::SUCCESS,
    }
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(
            Command::new(cli::VERSION_SUBCOMMAND)
                .about(cli::VERSION_DESCRIPTION)
                .arg(arg!(--json "Print as JSON")),
        )
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(
                    arg!(-p --port <PORT>)
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on. Overrides QUICKDESK_PORT"),
                )
                .arg(
                    arg!(-d --dir <DIR>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Uploads directory. Overrides QUICKDESK_UPLOADS_DIR"),
                ),
        )
        .subcommand(
            Command::new(cli::TOKEN_SUBCOMMAND)
                .about(cli::TOKEN_DESCRIPTION)
                .arg(
                    arg!(-s --subject <SUBJECT>)
                        .required(true)
                        .help("User id placed into the token"),
                )
                .arg(
                    arg!(-r --role <ROLE>)
                        .value_parser(["user", "agent", "admin"])
                        .default_value("user"),
                )
                .arg(
                    arg!(--ttl <HOURS>)
                        .value_parser(value_parser!(u64))
                        .default_value(DEFAULT_TOKEN_TTL_HOURS)
                        .help("Token lifetime in hours"),
                ),
        )
        .subcommand(
            service_command(cli::UPLOAD_SUBCOMMAND, cli::UPLOAD_DESCRIPTION).arg(
                arg!(<FILES>... "Files to upload. More than one uses the multiple upload endpoint")
                    .id("files")
                    .value_parser(value_parser!(PathBuf)),
            ),
        )
        .subcommand(
            file_command(cli::DOWNLOAD_SUBCOMMAND, cli::DOWNLOAD_DESCRIPTION).arg(
                arg!(-o --output <PATH>)
                    .value_parser(value_parser!(PathBuf))
                    .help("Target path. Defaults to the stored file name"),
            ),
        )
        .subcommand(file_command(cli::INFO_SUBCOMMAND, cli::INFO_DESCRIPTION))
        .subcommand(file_command(cli::DELETE_SUBCOMMAND, cli::DELETE_DESCRIPTION))
        .subcommand(service_command(cli::STATS_SUBCOMMAND, cli::STATS_DESCRIPTION))
        .subcommand(
            service_command(cli::CLEANUP_SUBCOMMAND, cli::CLEANUP_DESCRIPTION).arg(
                arg!(--days <DAYS>)
                    .value_parser(value_parser!(u32))
                    .help("Maximum age in days. Server default when omitted"),
            ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn service_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            arg!(-u --uri <URI>)
                .default_value(cli::DEFAULT_URI)
                .help("QuickDesk server URI"),
        )
        .arg(
            arg!(-t --token <TOKEN>)
                .env("QUICKDESK_TOKEN")
                .help("Bearer token"),
        )
}

fn file_command(name: &'static str, about: &'static str) -> Command {
    service_command(name, about).arg(
        arg!(<FILENAME> "Stored file name as returned by upload")
            .id("filename"),
    )
}

fn service(m: &ArgMatches) -> Service {
    Service {
        uri: m
            .get_one::<String>("uri")
            .map_or(cli::DEFAULT_URI, String::as_str)
            .to_owned(),
        token: m.get_one::<String>("token").cloned(),
    }
}

fn file_name(m: &ArgMatches) -> &str {
    m.get_one::<String>("filename").map_or("", String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[rstest]
    #[case(&["quickdesk", "upload", "a.txt"], 1)]
    #[case(&["quickdesk", "upload", "a.txt", "b.pdf", "c.png"], 3)]
    #[trace]
    fn upload_collects_files(#[case] args: &[&str], #[case] expected: usize) {
        // Act
        let m = build_cli().try_get_matches_from(args).unwrap();

        // Assert
        let (_, upload) = m.subcommand().unwrap();
        assert_eq!(upload.get_many::<PathBuf>("files").unwrap().count(), expected);
        assert_eq!(service(upload).uri, cli::DEFAULT_URI);
    }

    #[test]
    fn cleanup_days_is_optional() {
        // Act
        let m = build_cli()
            .try_get_matches_from(["quickdesk", "cleanup", "-u", "http://desk:8080"])
            .unwrap();

        // Assert
        let (_, cleanup) = m.subcommand().unwrap();
        assert!(cleanup.get_one::<u32>("days").is_none());
        assert_eq!(service(cleanup).uri, "http://desk:8080");
    }

    #[test]
    fn negative_days_are_rejected() {
        let result = build_cli().try_get_matches_from(["quickdesk", "cleanup", "--days", "-1"]);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let result = build_cli().try_get_matches_from(["quickdesk", "token", "-s", "u1", "-r", "root"]);
        assert!(result.is_err());
    }
}

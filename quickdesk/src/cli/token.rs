use std::process::ExitCode;
use std::time::Duration;

use kernel::Role;
use server::{auth, config::Config};

const SECONDS_PER_HOUR: u64 = 60 * 60;

pub fn run(subject: &str, role: Role, ttl_hours: u64) -> ExitCode {
    let config = Config::from_env();
    let ttl = Duration::from_secs(ttl_hours.saturating_mul(SECONDS_PER_HOUR));

    match auth::issue_token(&config.jwt_secret, subject, role, ttl) {
        Ok(token) => {
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

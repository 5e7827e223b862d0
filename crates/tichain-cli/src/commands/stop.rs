//! `tichain stop`: signals a running daemon via its pidfile, grounded on
//! `dashflow-cli::commands::status`'s `std::process::Command` shell-out
//! idiom (exact argv, no shell interpolation of untrusted input).

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::output::{print_error, print_success};
use std::process::Command;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env();
    let pid_text = std::fs::read_to_string(&config.pid_file).map_err(|_| {
        CliError::Upstream(format!("no pidfile at {}, is tichain running?", config.pid_file))
    })?;
    let pid: u32 = pid_text
        .trim()
        .parse()
        .map_err(|_| CliError::Internal(format!("pidfile {} does not contain a valid pid", config.pid_file)))?;

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .map_err(|e| CliError::Internal(format!("failed to invoke kill: {e}")))?;

    if status.success() {
        print_success(&format!("sent SIGTERM to pid {pid}"));
        Ok(())
    } else {
        print_error(&format!("kill -TERM {pid} exited with {status}"));
        Err(CliError::Internal(format!("kill -TERM {pid} failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_parse_rejects_garbage() {
        let result: std::result::Result<u32, _> = "not-a-pid".trim().parse();
        assert!(result.is_err());
    }
}
